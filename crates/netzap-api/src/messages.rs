//! `/messages` endpoints used by the chat client. Lists and sent messages
//! go out bare, without the `{success, data}` envelope of `/whatsapp`.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use netzap_types::api::{AckResponse, LastMessageIdResponse, MarkAsReadRequest, SendMessageRequest};
use netzap_types::models::Message;

use crate::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub chat_id: Option<String>,
}

/// With `?chatId=` the chat's history, otherwise the chat list.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> ApiResult<Response> {
    match query.chat_id.filter(|id| !id.is_empty()) {
        Some(chat_id) => {
            let messages = state.hub.list_chat_messages(&chat_id).await?;
            Ok(Json(messages).into_response())
        }
        None => {
            let chats = state.hub.list_chats().await?;
            Ok(Json(chats).into_response())
        }
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let Json(req) = payload?;
    let to = req.to.trim();
    if to.is_empty() {
        return Err(ApiError::validation("recipient is required"));
    }
    if req.message.trim().is_empty() {
        return Err(ApiError::validation("message is required"));
    }

    let sent = state.hub.send_message(to, &req.message).await?;

    if req.mark_as_read.unwrap_or(false) {
        // The send already went out; a failed read marker does not undo it.
        if let Err(e) = state.hub.mark_chat_read(&sent.chat_id).await {
            warn!("Sent {} but could not mark {} as read: {}", sent.id, sent.chat_id, e);
        }
    }

    Ok((StatusCode::CREATED, Json(sent)))
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    payload: Result<Json<MarkAsReadRequest>, JsonRejection>,
) -> ApiResult<Json<AckResponse>> {
    let Json(req) = payload?;
    if req.chat_id.trim().is_empty() {
        return Err(ApiError::validation("chatId is required"));
    }

    state.hub.mark_chat_read(&req.chat_id).await?;
    Ok(Json(AckResponse::ok("chat marked as read")))
}

pub async fn last_message_id(State(state): State<AppState>) -> ApiResult<Json<LastMessageIdResponse>> {
    Ok(Json(LastMessageIdResponse {
        success: true,
        last_message_id: state.hub.get_last_message_id().await?,
    }))
}
