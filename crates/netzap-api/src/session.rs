use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::info;

use netzap_types::api::{SessionAction, SessionActionRequest, SessionStatusResponse};

use crate::AppState;
use crate::error::ApiResult;

pub async fn get_status(State(state): State<AppState>) -> Json<SessionStatusResponse> {
    Json(state.hub.session_status().into())
}

/// `{"action": "initialize" | "logout"}`. Responds with the resulting status.
pub async fn execute_action(
    State(state): State<AppState>,
    payload: Result<Json<SessionActionRequest>, JsonRejection>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let Json(req) = payload?;
    info!("Session action requested: {:?}", req.action);

    match req.action {
        SessionAction::Initialize => state.hub.initialize_session().await?,
        SessionAction::Logout => state.hub.logout_session().await?,
    }

    Ok(Json(state.hub.session_status().into()))
}
