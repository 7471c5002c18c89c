use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::services::encryption::CodecError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Card is blocked: {0}")]
    CardBlocked(String),

    #[error("Card is expired: {0}")]
    CardExpired(String),

    #[error("Insufficient funds on card {masked_number}: balance={balance:.2}, required={requested:.2}")]
    InsufficientFunds {
        masked_number: String,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Card number codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Temporarily unavailable, retry: {0}")]
    Retryable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

// Postgres SQLSTATEs that mean "try again": lock_not_available,
// deadlock_detected, serialization_failure.
const RETRYABLE_SQLSTATES: [&str; 3] = ["55P03", "40P01", "40001"];

pub fn is_retryable_sqlstate(code: &str) -> bool {
    RETRYABLE_SQLSTATES.contains(&code)
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().is_some_and(|code| is_retryable_sqlstate(&code)) {
                return AppError::Retryable(db_err.message().to_string());
            }
        }
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return AppError::Retryable("database pool exhausted".to_string());
        }
        AppError::Database(err)
    }
}

impl AppError {
    /// Stable machine-readable category used in error payloads.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::CardBlocked(_) => "card_blocked",
            AppError::CardExpired(_) => "card_expired",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::Codec(_) => "codec_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Retryable(_) => "retryable",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_)
            | AppError::CardBlocked(_)
            | AppError::CardExpired(_)
            | AppError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Retryable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Codec(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            AppError::Codec(_) | AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!(error = ?self, "Unhandled internal error");
                "An unexpected error occurred".to_string()
            }
            AppError::Retryable(detail) => {
                tracing::warn!(detail = %detail, "Request failed with retryable error");
                "Temporarily unavailable, please retry".to_string()
            }
            other => {
                tracing::warn!(category = other.category(), "{}", other);
                other.to_string()
            }
        };

        let body = Json(json!({
            "error": self.category(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_funds_message_carries_diagnostics() {
        let err = AppError::InsufficientFunds {
            masked_number: "**** **** **** 1111".to_string(),
            balance: dec!(900.00),
            requested: dec!(1000.00),
        };

        assert_eq!(
            err.to_string(),
            "Insufficient funds on card **** **** **** 1111: balance=900.00, required=1000.00"
        );
        assert_eq!(err.category(), "insufficient_funds");
    }

    #[rstest]
    #[case("55P03", true)]
    #[case("40P01", true)]
    #[case("40001", true)]
    #[case("23505", false)]
    #[case("23503", false)]
    #[case("", false)]
    fn test_retryable_sqlstates(#[case] code: &str, #[case] retryable: bool) {
        assert_eq!(is_retryable_sqlstate(code), retryable);
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, AppError::Retryable(_)));
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = AppError::Internal(anyhow::anyhow!("secret connection string"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
