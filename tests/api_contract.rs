//! Request-level behaviour that is decided before any query runs: auth,
//! input validation, webhook signatures and the cron secret.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use common::*;

// ---------------------------------------------------------------------------
// Routing and authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_is_404() {
    let res = get(build_test_app(), "/api/does-not-exist", None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn protected_route_without_token_is_401() {
    let res = get(build_test_app(), "/api/profile", None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(res).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn garbage_token_is_401() {
    let res = get(build_test_app(), "/api/journal", Some("not-a-jwt")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_signed_with_another_secret_is_401() {
    let forged = token_with(Uuid::new_v4(), 3600, "some-other-secret");
    let res = get(build_test_app(), "/api/insights", Some(&forged)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_token_is_401() {
    let expired = token_with(Uuid::new_v4(), -3600, JWT_SECRET);
    let res = get(build_test_app(), "/api/dashboard", Some(&expired)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_is_checked_before_the_body() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/checkins",
        None,
        json!({ "relationship_id": Uuid::new_v4(), "connection_score": 99, "mood_score": 5 }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_is_accepted_in_place_of_a_bearer_token() {
    // A validation error proves the request made it past auth.
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/journal")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, format!("theme=dark; sb-access-token={}", token()))
        .body(Body::from(json!({ "content": "   " }).to_string()))
        .unwrap();

    let res = send(build_test_app(), request).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn checkin_score_out_of_range_is_400() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/checkins",
        Some(&token()),
        json!({ "relationship_id": Uuid::new_v4(), "connection_score": 11, "mood_score": 5 }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let json = body_json(res).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["error"].as_str().unwrap().contains("connection_score"));
}

#[tokio::test]
async fn checkin_history_window_is_bounded() {
    let uri = format!("/api/checkins?relationship_id={}&days=0", Uuid::new_v4());
    let res = get(build_test_app(), &uri, Some(&token())).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blank_journal_entry_is_400() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/journal",
        Some(&token()),
        json!({ "content": "" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn journal_mood_below_one_is_400() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/journal",
        Some(&token()),
        json!({ "content": "We cooked together tonight.", "mood_score": 0 }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn journal_page_size_is_bounded() {
    let res = get(build_test_app(), "/api/journal?limit=0", Some(&token())).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = get(build_test_app(), "/api/journal?limit=500", Some(&token())).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = get(build_test_app(), "/api/journal?offset=-1", Some(&token())).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_body_is_rejected() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/journal")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token()))
        .body(Body::from("{ not json"))
        .unwrap();

    let res = send(build_test_app(), request).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_billing_plan_is_400_json() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/billing/checkout",
        Some(&token()),
        json!({ "plan": "weekly" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let json = body_json(res).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["error"].as_str().unwrap().contains("weekly"));
}

#[tokio::test]
async fn mistyped_checkin_score_is_400_json() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/checkins",
        Some(&token()),
        json!({ "relationship_id": Uuid::new_v4(), "connection_score": "high", "mood_score": 5 }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn missing_required_field_is_400_json() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/relationships",
        Some(&token()),
        json!({ "name": "Us" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn malformed_query_string_is_400_json() {
    let res = get(
        build_test_app(),
        "/api/dashboard?relationship_id=not-a-uuid",
        Some(&token()),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn malformed_path_id_is_400_json() {
    let res = get(build_test_app(), "/api/journal/not-a-uuid", Some(&token())).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn out_of_range_cycle_update_is_rejected_before_lookup() {
    let uri = format!("/api/cycles/{}", Uuid::new_v4());
    let res = json_request(
        build_test_app(),
        Method::PUT,
        &uri,
        Some(&token()),
        json!({ "cycle_length": 100 }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cycle_length_outside_range_is_400() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/cycles",
        Some(&token()),
        json!({ "start_date": Utc::now().date_naive().to_string(), "cycle_length": 100 }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let json = body_json(res).await;
    assert!(json["error"].as_str().unwrap().contains("cycle_length"));
}

#[tokio::test]
async fn cycle_starting_in_the_future_is_400() {
    let tomorrow = Utc::now().date_naive() + Duration::days(2);
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/cycles",
        Some(&token()),
        json!({ "start_date": tomorrow.to_string() }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_relationship_type_is_400() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/relationships",
        Some(&token()),
        json!({ "name": "Us", "relationship_type": "situationship" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn owner_role_cannot_be_granted_by_invite() {
    let uri = format!("/api/relationships/{}/members", Uuid::new_v4());
    let res = json_request(
        build_test_app(),
        Method::POST,
        &uri,
        Some(&token()),
        json!({ "user_id": Uuid::new_v4(), "role": "owner" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inviting_yourself_is_400() {
    let me = Uuid::new_v4();
    let uri = format!("/api/relationships/{}/members", Uuid::new_v4());
    let res = json_request(
        build_test_app(),
        Method::POST,
        &uri,
        Some(&token_with(me, 3600, JWT_SECRET)),
        json!({ "user_id": me }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blank_display_name_is_400() {
    let res = json_request(
        build_test_app(),
        Method::PUT,
        "/api/profile",
        Some(&token()),
        json!({ "display_name": "  " }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn onboarding_rejects_too_many_goals() {
    let goals: Vec<String> = (0..11).map(|i| format!("goal {i}")).collect();
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/onboarding",
        Some(&token()),
        json!({ "relationship_type": "romantic", "goals": goals }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn onboarding_answers_must_be_an_object() {
    let res = json_request(
        build_test_app(),
        Method::POST,
        "/api/onboarding",
        Some(&token()),
        json!({ "relationship_type": "romantic", "answers": ["a", "b"] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Stripe webhook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_without_signature_is_400() {
    let res = post_webhook(build_test_app(), r#"{"id":"evt_1"}"#, None).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let json = body_json(res).await;
    assert_eq!(json["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn webhook_signed_with_wrong_secret_is_400() {
    let payload = r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
    let sig = stripe_signature(payload, "whsec_wrong", Utc::now().timestamp());

    let res = post_webhook(build_test_app(), payload, Some(sig)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn stale_webhook_is_400() {
    let payload = r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
    let sig = stripe_signature(payload, WEBHOOK_SECRET, Utc::now().timestamp() - 3600);

    let res = post_webhook(build_test_app(), payload, Some(sig)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn signed_but_malformed_event_is_bad_request() {
    let payload = r#"{"hello":"world"}"#;
    let sig = stripe_signature(payload, WEBHOOK_SECRET, Utc::now().timestamp());

    let res = post_webhook(build_test_app(), payload, Some(sig)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cron_without_secret_is_401() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/cron/daily-insights")
        .body(Body::empty())
        .unwrap();

    let res = send(build_test_app(), request).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cron_with_wrong_secret_is_401() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/cron/daily-insights")
        .header("x-cron-secret", "guess")
        .body(Body::empty())
        .unwrap();

    let res = send(build_test_app(), request).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
