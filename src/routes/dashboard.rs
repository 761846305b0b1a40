use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::cycle::CycleSnapshot;
use crate::error::AppResult;
use crate::extract::AppQuery;
use crate::generation::recent_journals;
use crate::models::DailyCheckin;
use crate::routes::checkins::COLUMNS as CHECKIN_COLUMNS;
use crate::routes::cycle::active_cycle;
use crate::routes::relationships::require_member;
use crate::scoring::{checkin_streak, health_score, HealthScore, LOOKBACK_DAYS};
use crate::state::AppState;

/// How far back to look for an unbroken streak.
const STREAK_LOOKBACK_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub relationship_id: Uuid,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    relationship_id: Uuid,
    health: HealthScore,
    checkin_streak: u32,
    checked_in_today: bool,
    unread_insights: i64,
    unread_partner_suggestions: i64,
    cycle: Option<CycleSnapshot>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(get_dashboard))
}

async fn get_dashboard(
    user: AuthUser,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<DashboardQuery>,
) -> AppResult<Json<DashboardResponse>> {
    let relationship_id = params.relationship_id;
    require_member(&state.pool, relationship_id, user.user_id).await?;

    let now = Utc::now();
    let today = now.date_naive();

    let query = format!(
        "SELECT {CHECKIN_COLUMNS} FROM daily_checkins \
         WHERE user_id = $1 AND relationship_id = $2 AND checkin_date >= $3 \
         ORDER BY checkin_date ASC"
    );
    let checkins = sqlx::query_as::<_, DailyCheckin>(&query)
        .bind(user.user_id)
        .bind(relationship_id)
        .bind(today - Duration::days(LOOKBACK_DAYS - 1))
        .fetch_all(&state.pool)
        .await?;

    let journals = recent_journals(
        &state.pool,
        user.user_id,
        relationship_id,
        now - Duration::days(LOOKBACK_DAYS),
    )
    .await?;

    let streak_dates: Vec<NaiveDate> = sqlx::query_scalar(
        "SELECT DISTINCT checkin_date FROM daily_checkins \
         WHERE user_id = $1 AND relationship_id = $2 AND checkin_date >= $3",
    )
    .bind(user.user_id)
    .bind(relationship_id)
    .bind(today - Duration::days(STREAK_LOOKBACK_DAYS))
    .fetch_all(&state.pool)
    .await?;

    let unread_insights: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM relationship_insights \
         WHERE user_id = $1 AND relationship_id = $2 \
           AND NOT is_read AND NOT is_dismissed AND expires_at > now()",
    )
    .bind(user.user_id)
    .bind(relationship_id)
    .fetch_one(&state.pool)
    .await?;

    let unread_partner_suggestions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM partner_suggestions \
         WHERE recipient_id = $1 AND relationship_id = $2 \
           AND NOT is_read AND NOT is_dismissed AND expires_at > now()",
    )
    .bind(user.user_id)
    .bind(relationship_id)
    .fetch_one(&state.pool)
    .await?;

    let cycle = active_cycle(&state.pool, user.user_id)
        .await?
        .and_then(|c| CycleSnapshot::compute(c.start_date, c.cycle_length, c.period_length, today));

    Ok(Json(DashboardResponse {
        relationship_id,
        health: health_score(&checkins, &journals, now),
        checkin_streak: checkin_streak(&streak_dates, today),
        checked_in_today: streak_dates.contains(&today),
        unread_insights,
        unread_partner_suggestions,
        cycle,
    }))
}
