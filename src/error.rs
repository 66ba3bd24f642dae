use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::geo::GeoError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("no station with an available delivery person can serve this order")]
    NoFeasibleAssignment,

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("assignment expired: {0}")]
    AssignmentExpired(String),

    #[error("payment verification failed for order {0}")]
    PaymentVerificationFailed(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::NoFeasibleAssignment => "no_feasible_assignment",
            AppError::InsufficientStock(_) => "insufficient_stock",
            AppError::AlreadyClaimed(_) => "already_claimed",
            AppError::AssignmentExpired(_) => "assignment_expired",
            AppError::PaymentVerificationFailed(_) => "payment_verification_failed",
            AppError::Timeout(_) => "timeout",
            AppError::Internal(_) => "internal",
        }
    }

    /// Lost a reservation or claim race; the caller may re-plan once.
    pub fn is_race_lost(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientStock(_) | AppError::AlreadyClaimed(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NoFeasibleAssignment => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no delivery capacity near you right now, try again later".to_string(),
            ),
            AppError::InsufficientStock(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::AlreadyClaimed(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::AssignmentExpired(msg) => (
                StatusCode::GONE,
                format!("order expired, please plan again: {msg}"),
            ),
            AppError::PaymentVerificationFailed(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "payment signature could not be verified".to_string(),
            ),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

impl From<GeoError> for AppError {
    fn from(err: GeoError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}
