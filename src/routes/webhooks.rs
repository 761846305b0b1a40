use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::stripe::{
    verify_webhook_signature, CheckoutSessionObject, Event, InvoiceObject, SignatureError,
    StripeError, SubscriptionObject, WebhookEvent, SIGNATURE_TOLERANCE_SECS,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    received: bool,
    duplicate: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(stripe_webhook))
}

/// Each event is recorded once; replays are acknowledged without being applied
/// again. Recording and applying share a transaction so a failure lets Stripe
/// retry.
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StripeError::Signature(SignatureError::MalformedHeader))?;

    verify_webhook_signature(
        &body,
        signature,
        state.config.stripe.webhook_secret.expose_secret(),
        Utc::now().timestamp(),
        SIGNATURE_TOLERANCE_SECS,
    )
    .map_err(StripeError::from)?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid event payload: {e}")))?;
    let event: Event = serde_json::from_value(payload.clone())
        .map_err(|e| AppError::BadRequest(format!("Invalid event payload: {e}")))?;
    let classified = event
        .classify()
        .map_err(|e| AppError::BadRequest(format!("Invalid {} object: {e}", event.event_type)))?;

    let mut tx = state.pool.begin().await?;

    let recorded = sqlx::query(
        "INSERT INTO subscription_events (stripe_event_id, event_type, payload) \
         VALUES ($1, $2, $3) ON CONFLICT (stripe_event_id) DO NOTHING",
    )
    .bind(&event.id)
    .bind(&event.event_type)
    .bind(&payload)
    .execute(&mut *tx)
    .await?;

    if recorded.rows_affected() == 0 {
        tx.rollback().await?;
        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Duplicate webhook ignored");
        return Ok(Json(WebhookAck {
            received: true,
            duplicate: true,
        }));
    }

    let user_id = apply_event(&mut tx, classified, &event).await?;

    if user_id.is_some() {
        sqlx::query("UPDATE subscription_events SET user_id = $2 WHERE stripe_event_id = $1")
            .bind(&event.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(Json(WebhookAck {
        received: true,
        duplicate: false,
    }))
}

async fn apply_event(
    tx: &mut Transaction<'_, Postgres>,
    classified: WebhookEvent,
    event: &Event,
) -> AppResult<Option<Uuid>> {
    match classified {
        WebhookEvent::CheckoutCompleted(session) => checkout_completed(tx, session).await,
        WebhookEvent::SubscriptionChanged(subscription) => {
            subscription_changed(tx, subscription, &event.event_type).await
        }
        WebhookEvent::PaymentFailed(invoice) => payment_failed(tx, invoice).await,
        WebhookEvent::Other => {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Unhandled webhook recorded");
            Ok(None)
        }
    }
}

async fn user_for_customer(
    conn: &mut PgConnection,
    customer_id: &str,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT user_id FROM stripe_customers WHERE stripe_customer_id = $1")
        .bind(customer_id)
        .fetch_optional(conn)
        .await
}

async fn checkout_completed(
    tx: &mut Transaction<'_, Postgres>,
    session: CheckoutSessionObject,
) -> AppResult<Option<Uuid>> {
    let Some(user_id) = session
        .client_reference_id
        .as_deref()
        .and_then(|r| Uuid::parse_str(r).ok())
    else {
        tracing::warn!(session_id = %session.id, "Checkout session without a user reference");
        return Ok(None);
    };

    if let Some(customer_id) = &session.customer {
        sqlx::query(
            "INSERT INTO stripe_customers (user_id, stripe_customer_id) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET stripe_customer_id = EXCLUDED.stripe_customer_id",
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&mut **tx)
        .await?;
    }

    tracing::info!(
        user_id = %user_id,
        session_id = %session.id,
        subscription_id = session.subscription.as_deref().unwrap_or("-"),
        "Checkout completed"
    );
    Ok(Some(user_id))
}

async fn subscription_changed(
    tx: &mut Transaction<'_, Postgres>,
    subscription: SubscriptionObject,
    event_type: &str,
) -> AppResult<Option<Uuid>> {
    let Some(user_id) = user_for_customer(&mut **tx, &subscription.customer).await? else {
        tracing::warn!(
            customer_id = %subscription.customer,
            subscription_id = %subscription.id,
            "Subscription event for an unknown customer"
        );
        return Ok(None);
    };

    let period_end: Option<DateTime<Utc>> = subscription
        .period_end()
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    sqlx::query(
        "INSERT INTO premium_subscriptions \
            (user_id, stripe_subscription_id, status, price_id, current_period_end, cancel_at_period_end) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (user_id) DO UPDATE SET \
            stripe_subscription_id = EXCLUDED.stripe_subscription_id, \
            status = EXCLUDED.status, \
            price_id = EXCLUDED.price_id, \
            current_period_end = EXCLUDED.current_period_end, \
            cancel_at_period_end = EXCLUDED.cancel_at_period_end, \
            updated_at = now()",
    )
    .bind(user_id)
    .bind(&subscription.id)
    .bind(&subscription.status)
    .bind(subscription.price_id())
    .bind(period_end)
    .bind(subscription.cancel_at_period_end)
    .execute(&mut **tx)
    .await?;

    tracing::info!(
        user_id = %user_id,
        subscription_id = %subscription.id,
        status = %subscription.status,
        event_type,
        "Subscription synced"
    );
    Ok(Some(user_id))
}

async fn payment_failed(
    tx: &mut Transaction<'_, Postgres>,
    invoice: InvoiceObject,
) -> AppResult<Option<Uuid>> {
    let user_id = match invoice.customer.as_deref() {
        Some(customer_id) => user_for_customer(&mut **tx, customer_id).await?,
        None => None,
    };

    tracing::warn!(
        invoice_id = %invoice.id,
        user_id = ?user_id,
        "⚠️ Invoice payment failed"
    );
    Ok(user_id)
}
