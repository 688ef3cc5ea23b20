use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use netzap_hub::HubError;
use netzap_types::api::ErrorResponse;

/// A [`HubError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub HubError);

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self(HubError::Validation(msg.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            HubError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            HubError::Connection(_) => StatusCode::BAD_GATEWAY,
            HubError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HubError::MediaUnavailable(_) | HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{} -> {}", self.0, status);
        } else {
            warn!("{} -> {}", self.0, status);
        }
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
