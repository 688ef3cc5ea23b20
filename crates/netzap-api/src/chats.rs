//! `/whatsapp/...` read and media endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use netzap_types::api::{AckResponse, ListResponse, MediaResponse};
use netzap_types::models::{ChatGroup, Message};

use crate::AppState;
use crate::error::ApiResult;

const MAX_PAGE: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    MAX_PAGE
}

/// Every stored message, newest first.
pub async fn list_all_messages(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<ListResponse<Message>>> {
    let messages = state
        .hub
        .list_messages(page.limit.min(MAX_PAGE), page.offset)
        .await?;
    Ok(Json(ListResponse::new(messages)))
}

pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<ListResponse<ChatGroup>>> {
    Ok(Json(ListResponse::new(state.hub.list_chats().await?)))
}

pub async fn list_chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ListResponse<Message>>> {
    Ok(Json(ListResponse::new(state.hub.list_chat_messages(&chat_id).await?)))
}

pub async fn mark_chat_read(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<AckResponse>> {
    state.hub.mark_chat_read(&chat_id).await?;
    Ok(Json(AckResponse::ok("chat marked as read")))
}

pub async fn get_media(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<MediaResponse>> {
    let data = state.hub.get_message_media(&message_id).await?;
    Ok(Json(MediaResponse { success: true, data }))
}
