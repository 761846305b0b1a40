use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppQuery};
use crate::models::DailyCheckin;
use crate::routes::relationships::require_member;
use crate::state::AppState;
use crate::validation;

pub(crate) const COLUMNS: &str = "id, user_id, relationship_id, checkin_date, connection_score, \
    mood_score, notes, created_at, updated_at";
const MAX_NOTES_CHARS: usize = 2_000;

#[derive(Debug, Deserialize)]
pub struct SaveCheckin {
    pub relationship_id: Uuid,
    pub connection_score: i32,
    pub mood_score: i32,
    pub notes: Option<String>,
}

impl SaveCheckin {
    pub fn validate(&self) -> AppResult<()> {
        validation::score("connection_score", self.connection_score)?;
        validation::score("mood_score", self.mood_score)?;
        if let Some(notes) = &self.notes {
            validation::text("notes", notes, 0, MAX_NOTES_CHARS)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckinQuery {
    pub relationship_id: Uuid,
    pub days: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/checkins", get(list_checkins).post(save_checkin))
}

/// One check-in per member, relationship and day; saving again overwrites it.
async fn save_checkin(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<SaveCheckin>,
) -> AppResult<Json<DailyCheckin>> {
    body.validate()?;
    require_member(&state.pool, body.relationship_id, user.user_id).await?;

    let today = Utc::now().date_naive();
    let notes = body
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let query = format!(
        "INSERT INTO daily_checkins \
            (user_id, relationship_id, checkin_date, connection_score, mood_score, notes) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (user_id, relationship_id, checkin_date) DO UPDATE SET \
            connection_score = EXCLUDED.connection_score, \
            mood_score = EXCLUDED.mood_score, \
            notes = EXCLUDED.notes, \
            updated_at = now() \
         RETURNING {COLUMNS}"
    );
    let checkin = sqlx::query_as::<_, DailyCheckin>(&query)
        .bind(user.user_id)
        .bind(body.relationship_id)
        .bind(today)
        .bind(body.connection_score)
        .bind(body.mood_score)
        .bind(notes)
        .fetch_one(&state.pool)
        .await?;

    tracing::info!(
        user_id = %user.user_id,
        relationship_id = %body.relationship_id,
        connection_score = body.connection_score,
        "Check-in saved"
    );
    Ok(Json(checkin))
}

async fn list_checkins(
    user: AuthUser,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<CheckinQuery>,
) -> AppResult<Json<Vec<DailyCheckin>>> {
    let days = params.days.unwrap_or(30);
    if !(1..=365).contains(&days) {
        return Err(AppError::BadRequest("days must be between 1 and 365".into()));
    }

    require_member(&state.pool, params.relationship_id, user.user_id).await?;

    let since = Utc::now().date_naive() - Duration::days(days - 1);
    let query = format!(
        "SELECT {COLUMNS} FROM daily_checkins \
         WHERE user_id = $1 AND relationship_id = $2 AND checkin_date >= $3 \
         ORDER BY checkin_date DESC"
    );
    let rows = sqlx::query_as::<_, DailyCheckin>(&query)
        .bind(user.user_id)
        .bind(params.relationship_id)
        .bind(since)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(rows))
}
