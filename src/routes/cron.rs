use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use secrecy::ExposeSecret;

use crate::error::{AppError, AppResult};
use crate::generation::{run_daily_batch, DailyRunSummary};
use crate::state::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub fn routes() -> Router<AppState> {
    Router::new().route("/cron/daily-insights", post(daily_insights))
}

/// Called once a day by the external scheduler.
async fn daily_insights(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<DailyRunSummary>> {
    let provided = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let expected = state.config.cron_secret.expose_secret();
    if provided.is_empty() || !constant_time_eq(provided, expected) {
        tracing::warn!("Rejected daily-insights call with a bad cron secret");
        return Err(AppError::Unauthorized("Invalid cron secret".into()));
    }

    tracing::info!("⏰ Daily insight run started");
    Ok(Json(run_daily_batch(&state).await?))
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_secrets_match() {
        assert!(constant_time_eq("cron-secret", "cron-secret"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn different_secrets_do_not_match() {
        assert!(!constant_time_eq("cron-secret", "cron-secreT"));
        assert!(!constant_time_eq("cron-secret", "cron-secre"));
        assert!(!constant_time_eq("cron-secret", "cron-secret!"));
    }
}
