//! `AppError` to HTTP response mapping. No server needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;

use heartline::error::AppError;
use heartline::stripe::{SignatureError, StripeError};

async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn bad_request_returns_400_with_message() {
    let (status, json) =
        error_to_response(AppError::BadRequest("mood_score must be between 1 and 10".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "mood_score must be between 1 and 10");
}

#[tokio::test]
async fn not_found_names_the_entity() {
    let (status, json) = error_to_response(AppError::NotFound("Journal entry")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Journal entry not found");
}

#[tokio::test]
async fn forbidden_and_unauthorized_keep_their_messages() {
    let (status, json) = error_to_response(AppError::Forbidden("premium only".into())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "premium only");

    let (status, json) = error_to_response(AppError::Unauthorized("no token".into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn conflict_returns_409() {
    let (status, json) = error_to_response(AppError::Conflict("already subscribed".into())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

#[tokio::test]
async fn row_not_found_maps_to_404() {
    let (status, json) = error_to_response(AppError::Database(sqlx::Error::RowNotFound)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn other_database_errors_are_generic_500() {
    let (status, json) = error_to_response(AppError::Database(sqlx::Error::PoolTimedOut)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn internal_errors_hide_details() {
    let (status, json) =
        error_to_response(AppError::Internal("secret connection string".into())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!json["error"].as_str().unwrap().contains("secret"));
}

#[tokio::test]
async fn bad_webhook_signature_is_a_client_error() {
    let (status, json) = error_to_response(AppError::Stripe(StripeError::Signature(
        SignatureError::Mismatch,
    )))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn upstream_stripe_failure_is_502() {
    let (status, json) = error_to_response(AppError::Stripe(StripeError::Api {
        status: 500,
        message: "boom".into(),
    }))
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "UPSTREAM_ERROR");
}
