use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

/// Errors produced by the service layer.
///
/// `status_code` and `response_message` control what leaves the process:
/// internal failures are logged in full and genericized on the wire.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Order total {total} is below the minimum of {minimum} for this payment method")]
    PaymentAmountTooLow { total: i64, minimum: i64 },

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_)
            | ServiceError::InvalidOperation(_)
            | ServiceError::InvalidStatusTransition { .. }
            | ServiceError::PaymentAmountTooLow { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) | ServiceError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            ServiceError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the client.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "An internal error occurred".to_string()
            }
            ServiceError::ExternalServiceError(_) => {
                "An upstream service is unavailable".to_string()
            }
            other => other.to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::ValidationError(_) => "validation_error",
            ServiceError::InvalidOperation(_) => "invalid_operation",
            ServiceError::InvalidStatusTransition { .. } => "invalid_status_transition",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::PaymentAmountTooLow { .. } => "payment_amount_too_low",
            ServiceError::PaymentFailed(_) => "payment_failed",
            ServiceError::InvalidSignature => "invalid_signature",
            ServiceError::ExternalServiceError(_) => "external_service_error",
            ServiceError::DatabaseError(_) => "database_error",
            ServiceError::InternalError(_) => "internal_error",
        }
    }
}

/// Wire format for error responses
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "service error");
        }
        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.response_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Errors surfaced directly by HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    ServiceError(#[from] ServiceError),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(err) => err.into_response(),
            ApiError::ValidationError(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "validation_error".to_string(),
                    message,
                }),
            )
                .into_response(),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "bad_request".to_string(),
                    message,
                }),
            )
                .into_response(),
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "unauthorized".to_string(),
                    message,
                }),
            )
                .into_response(),
        }
    }
}
