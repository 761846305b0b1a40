use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::models::PremiumSubscription;
use crate::routes::profile::ensure_profile;
use crate::state::AppState;

const SUBSCRIPTION_COLUMNS: &str = "user_id, stripe_subscription_id, status, price_id, \
    current_period_end, cancel_at_period_end, updated_at";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Monthly,
    Yearly,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: Plan,
}

#[derive(Serialize)]
pub struct RedirectUrl {
    url: String,
}

#[derive(Serialize)]
pub struct SubscriptionStatus {
    is_premium: bool,
    status: Option<String>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/billing/subscription", get(get_subscription))
        .route("/billing/checkout", post(create_checkout))
        .route("/billing/portal", post(create_portal))
}

pub(crate) async fn find_subscription(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<PremiumSubscription>, sqlx::Error> {
    let query =
        format!("SELECT {SUBSCRIPTION_COLUMNS} FROM premium_subscriptions WHERE user_id = $1");
    sqlx::query_as::<_, PremiumSubscription>(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn is_premium(pool: &PgPool, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    Ok(find_subscription(pool, user_id)
        .await?
        .is_some_and(|sub| sub.is_premium_at(now)))
}

async fn find_customer_id(pool: &PgPool, user_id: Uuid) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT stripe_customer_id FROM stripe_customers WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

async fn get_subscription(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<SubscriptionStatus>> {
    let now = Utc::now();
    let status = match find_subscription(&state.pool, user.user_id).await? {
        Some(sub) => SubscriptionStatus {
            is_premium: sub.is_premium_at(now),
            status: Some(sub.status),
            current_period_end: sub.current_period_end,
            cancel_at_period_end: sub.cancel_at_period_end,
        },
        None => SubscriptionStatus {
            is_premium: false,
            status: None,
            current_period_end: None,
            cancel_at_period_end: false,
        },
    };
    Ok(Json(status))
}

/// Stripe customer for this user, created on first checkout.
async fn ensure_customer(state: &AppState, user: &AuthUser) -> AppResult<String> {
    if let Some(id) = find_customer_id(&state.pool, user.user_id).await? {
        return Ok(id);
    }

    let profile = ensure_profile(&state.pool, user).await?;
    let customer = state
        .stripe
        .create_customer(user.user_id, profile.email.as_deref())
        .await?;

    sqlx::query(
        "INSERT INTO stripe_customers (user_id, stripe_customer_id) VALUES ($1, $2) \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user.user_id)
    .bind(&customer.id)
    .execute(&state.pool)
    .await?;

    // a concurrent checkout may have won the insert
    let stored = find_customer_id(&state.pool, user.user_id)
        .await?
        .unwrap_or(customer.id);
    tracing::info!(user_id = %user.user_id, customer_id = %stored, "Stripe customer linked");
    Ok(stored)
}

async fn create_checkout(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<CheckoutRequest>,
) -> AppResult<Json<RedirectUrl>> {
    if is_premium(&state.pool, user.user_id).await? {
        return Err(AppError::Conflict("You already have an active subscription".into()));
    }

    let price_id = match body.plan {
        Plan::Monthly => &state.config.stripe.price_monthly,
        Plan::Yearly => &state.config.stripe.price_yearly,
    };

    let customer_id = ensure_customer(&state, &user).await?;
    let base = state.config.app_base_url.trim_end_matches('/');
    let session = state
        .stripe
        .create_checkout_session(
            &customer_id,
            price_id,
            user.user_id,
            &format!("{base}/billing/success?session_id={{CHECKOUT_SESSION_ID}}"),
            &format!("{base}/billing"),
        )
        .await?;

    let url = session
        .url
        .ok_or_else(|| AppError::Internal(format!("checkout session {} has no url", session.id)))?;

    tracing::info!(user_id = %user.user_id, session_id = %session.id, "Checkout session created");
    Ok(Json(RedirectUrl { url }))
}

async fn create_portal(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<RedirectUrl>> {
    let customer_id = find_customer_id(&state.pool, user.user_id)
        .await?
        .ok_or(AppError::NotFound("Billing account"))?;

    let base = state.config.app_base_url.trim_end_matches('/');
    let session = state
        .stripe
        .create_portal_session(&customer_id, &format!("{base}/settings"))
        .await?;

    let url = session
        .url
        .ok_or_else(|| AppError::Internal(format!("portal session {} has no url", session.id)))?;
    Ok(Json(RedirectUrl { url }))
}
