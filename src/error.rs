use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::llm::LlmError;
use crate::stripe::StripeError;

/// Error type shared by every handler. Renders as `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Stripe error: {0}")]
    Stripe(#[from] StripeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Database(err) => classify_sqlx_error(err),
            AppError::Llm(err) => {
                tracing::error!(error = %err, "❌ LLM request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "Text generation is unavailable right now".to_string(),
                )
            }
            AppError::Stripe(StripeError::Signature(err)) => {
                (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", err.to_string())
            }
            AppError::Stripe(err) => {
                tracing::error!(error = %err, "❌ Stripe request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "Billing provider is unavailable right now".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "❌ Internal error");
                internal()
            }
        };

        (status, axum::Json(json!({ "error": message, "code": code }))).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            let constraint = db_err.constraint().unwrap_or("unknown");
            tracing::info!(constraint, "🔒 Unique constraint violated");
            (
                StatusCode::CONFLICT,
                "CONFLICT",
                format!("Duplicate value violates unique constraint: {constraint}"),
            )
        }
        other => {
            tracing::error!(error = %other, "❌ DB error");
            internal()
        }
    }
}
