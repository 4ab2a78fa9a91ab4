use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use tracing::error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Ledger rule violations surfaced to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid order number: {0:?}")]
    InvalidOrderNumber(String),

    #[error("Order {0} was uploaded by another user")]
    OrderConflict(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Withdrawal amount must be positive, got {0}")]
    InvalidAmount(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Ledger(LedgerError::InvalidOrderNumber(number)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_ORDER_NUMBER",
                "Invalid order number".to_string(),
                Some(serde_json::json!({ "order": number })),
            ),
            AppError::Ledger(LedgerError::OrderConflict(number)) => (
                StatusCode::CONFLICT,
                "ORDER_CONFLICT",
                "Order has already been uploaded by another user".to_string(),
                Some(serde_json::json!({ "order": number })),
            ),
            AppError::Ledger(LedgerError::InsufficientFunds { required, available }) => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_FUNDS",
                "Not enough points".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Ledger(LedgerError::InvalidAmount(sum)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_AMOUNT",
                format!("Withdrawal amount must be positive, got {}", sum),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
                None,
            ),
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message, None)
            }
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    None,
                )
            }
            other => {
                error!("Internal error: {:?}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Internal(format!("HTTP client error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
