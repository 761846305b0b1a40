use axum::{extract::State, response::Json, routing::get, Router};
use chrono::NaiveDate;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::cycle::{cycle_history_stats, CycleStat};
use crate::error::AppResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct CycleStatsResponse {
    average_cycle_length: f64,
    average_period_length: f64,
    completed_cycles: usize,
    cycle_stats: Vec<CycleStat>,
}

pub async fn get_cycle_stats(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<CycleStatsResponse>> {
    let rows: Vec<(NaiveDate, i32)> = sqlx::query_as(
        "SELECT start_date, period_length FROM menstrual_cycles \
         WHERE user_id = $1 ORDER BY start_date ASC",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!("❌ DB error in get_cycle_stats: {:?}", e);
        e
    })?;

    let starts: Vec<NaiveDate> = rows.iter().map(|(start, _)| *start).collect();
    let history = cycle_history_stats(&starts);

    let total_period: i64 = rows.iter().map(|(_, period)| i64::from(*period)).sum();
    let count = rows.len() as f64;

    Ok(Json(CycleStatsResponse {
        average_cycle_length: history.average_cycle_length,
        average_period_length: if count > 0.0 { total_period as f64 / count } else { 0.0 },
        completed_cycles: history.completed_cycles,
        cycle_stats: history.cycle_stats,
    }))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/cycles/stats", get(get_cycle_stats))
}
