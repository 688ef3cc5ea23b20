use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::{debug, error};

use netzap_hub::HubError;
use netzap_types::api::{AckResponse, DebugSnapshot};
use netzap_types::transport::TransportEvent;

use crate::AppState;
use crate::error::{ApiError, ApiResult};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn debug(State(state): State<AppState>) -> ApiResult<Json<DebugSnapshot>> {
    Ok(Json(state.hub.debug_snapshot().await?))
}

/// Event ingress for the transport bridge. Events are queued for the hub's
/// event loop and processed in the order they were accepted here.
pub async fn transport_event(
    State(state): State<AppState>,
    payload: Result<Json<TransportEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AckResponse>)> {
    let Json(event) = payload?;
    let name = event.name();
    debug!("Transport webhook: {}", name);

    state.events.send(event).await.map_err(|_| {
        error!("Event loop is gone, dropping transport event {}", name);
        ApiError(HubError::NotConnected)
    })?;

    Ok((StatusCode::ACCEPTED, Json(AckResponse::ok("event queued"))))
}
