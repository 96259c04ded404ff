use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Why an inbound event was dropped. Rejections are logged and counted, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error("negative eta: {0}")]
    NegativeEta(i64),

    #[error("missing order id")]
    MissingOrderId,
}

impl EventError {
    pub fn reason(&self) -> &'static str {
        match self {
            EventError::Malformed(_) => "malformed",
            EventError::InvalidCoordinate { .. } => "invalid_coordinate",
            EventError::UnknownPhase(_) => "unknown_phase",
            EventError::NegativeEta(_) => "negative_eta",
            EventError::MissingOrderId => "missing_order_id",
        }
    }
}

impl From<EventError> for AppError {
    fn from(err: EventError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
