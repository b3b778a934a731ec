use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(i64),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(i64),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Coarse classification handed to the boundary layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InsufficientBalance,
    ValidationFailed,
    TransientFailure,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::AccountNotFound(_) | EngineError::ReservationNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::AccountAlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            EngineError::Validation(_) => ErrorKind::ValidationFailed,
            EngineError::Database(_)
            | EngineError::Redis(_)
            | EngineError::Nats(_)
            | EngineError::Internal(_) => ErrorKind::TransientFailure,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            EngineError::AccountNotFound(_) => "account_not_found",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::AccountAlreadyExists(_) => "duplicate_error",
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::Validation(_) => "validation_error",
            EngineError::Database(_) => "database_error",
            EngineError::Redis(_) => "cache_error",
            EngineError::Nats(_) => "messaging_error",
            EngineError::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<async_nats::PublishError> for EngineError {
    fn from(err: async_nats::PublishError) -> Self {
        EngineError::Nats(format!("NATS publish error: {}", err))
    }
}

impl ResponseError for EngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        // Transient failures are not described to clients
        let message = match self.kind() {
            ErrorKind::TransientFailure => "internal server error".to_string(),
            _ => self.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::InsufficientBalance => StatusCode::BAD_REQUEST,
            ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorKind::TransientFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
