use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::cycle::{
    CycleSnapshot, CYCLE_LENGTH_RANGE, DEFAULT_CYCLE_LENGTH, DEFAULT_PERIOD_LENGTH,
    PERIOD_LENGTH_RANGE,
};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::models::MenstrualCycle;
use crate::state::AppState;
use crate::validation;

pub(crate) const COLUMNS: &str =
    "id, user_id, start_date, cycle_length, period_length, is_active, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct NewCycle {
    pub start_date: NaiveDate,
    pub cycle_length: Option<i32>,
    pub period_length: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCycle {
    pub start_date: Option<NaiveDate>,
    pub cycle_length: Option<i32>,
    pub period_length: Option<i32>,
}

impl UpdateCycle {
    /// Checks the fields that can be judged without the stored row. The
    /// cross-field rules run on the merged values in [`validate_cycle`].
    pub fn validate(&self, today: NaiveDate) -> AppResult<()> {
        if let Some(cycle_length) = self.cycle_length {
            validation::in_range("cycle_length", cycle_length, CYCLE_LENGTH_RANGE)?;
        }
        if let Some(period_length) = self.period_length {
            validation::in_range("period_length", period_length, PERIOD_LENGTH_RANGE)?;
        }
        if self.start_date.is_some_and(|start| start > today) {
            return Err(AppError::BadRequest(
                "start_date cannot be in the future".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct CycleSummary {
    pub id: Uuid,
    #[serde(flatten)]
    pub snapshot: CycleSnapshot,
}

pub fn validate_cycle(
    start_date: NaiveDate,
    cycle_length: i32,
    period_length: i32,
    today: NaiveDate,
) -> AppResult<()> {
    validation::in_range("cycle_length", cycle_length, CYCLE_LENGTH_RANGE)?;
    validation::in_range("period_length", period_length, PERIOD_LENGTH_RANGE)?;
    if period_length >= cycle_length {
        return Err(AppError::BadRequest(
            "period_length must be shorter than cycle_length".into(),
        ));
    }
    if start_date > today {
        return Err(AppError::BadRequest(
            "start_date cannot be in the future".into(),
        ));
    }
    Ok(())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cycles", get(list_cycles).post(create_cycle))
        .route("/cycles/current", get(get_current_cycle))
        .route("/cycles/{id}", axum::routing::put(update_cycle).delete(delete_cycle))
}

pub(crate) async fn active_cycle(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<MenstrualCycle>, sqlx::Error> {
    let query = format!(
        "SELECT {COLUMNS} FROM menstrual_cycles WHERE user_id = $1 AND is_active LIMIT 1"
    );
    sqlx::query_as::<_, MenstrualCycle>(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Starting a cycle retires whichever one was active, so a user never has two.
async fn create_cycle(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<NewCycle>,
) -> AppResult<(StatusCode, Json<MenstrualCycle>)> {
    let cycle_length = body.cycle_length.unwrap_or(DEFAULT_CYCLE_LENGTH);
    let period_length = body.period_length.unwrap_or(DEFAULT_PERIOD_LENGTH);
    validate_cycle(body.start_date, cycle_length, period_length, Utc::now().date_naive())?;

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "UPDATE menstrual_cycles SET is_active = FALSE, updated_at = now() \
         WHERE user_id = $1 AND is_active",
    )
    .bind(user.user_id)
    .execute(&mut *tx)
    .await?;

    let query = format!(
        "INSERT INTO menstrual_cycles (user_id, start_date, cycle_length, period_length, is_active) \
         VALUES ($1, $2, $3, $4, TRUE) RETURNING {COLUMNS}"
    );
    let cycle = sqlx::query_as::<_, MenstrualCycle>(&query)
        .bind(user.user_id)
        .bind(body.start_date)
        .bind(cycle_length)
        .bind(period_length)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                tracing::error!("❌ DB insert failed: {}", db_err.message());
                if let Some(constraint) = db_err.constraint() {
                    tracing::info!("🔒 Constraint violated: {}", constraint);
                }
            }
            AppError::Database(e)
        })?;

    tx.commit().await?;

    tracing::info!(user_id = %user.user_id, cycle_id = %cycle.id, "Cycle started");
    Ok((StatusCode::CREATED, Json(cycle)))
}

async fn list_cycles(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<MenstrualCycle>>> {
    let query = format!(
        "SELECT {COLUMNS} FROM menstrual_cycles WHERE user_id = $1 ORDER BY start_date DESC"
    );
    let cycles = sqlx::query_as::<_, MenstrualCycle>(&query)
        .bind(user.user_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(cycles))
}

async fn get_current_cycle(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<CycleSummary>> {
    let cycle = active_cycle(&state.pool, user.user_id)
        .await?
        .ok_or(AppError::NotFound("Active cycle"))?;

    let today = Utc::now().date_naive();
    let snapshot = CycleSnapshot::compute(
        cycle.start_date,
        cycle.cycle_length,
        cycle.period_length,
        today,
    )
    .ok_or(AppError::NotFound("Active cycle"))?;

    Ok(Json(CycleSummary {
        id: cycle.id,
        snapshot,
    }))
}

async fn update_cycle(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<UpdateCycle>,
) -> AppResult<Json<MenstrualCycle>> {
    let today = Utc::now().date_naive();
    body.validate(today)?;

    let query = format!("SELECT {COLUMNS} FROM menstrual_cycles WHERE id = $1 AND user_id = $2");
    let existing = sqlx::query_as::<_, MenstrualCycle>(&query)
        .bind(id)
        .bind(user.user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Cycle"))?;

    let start_date = body.start_date.unwrap_or(existing.start_date);
    let cycle_length = body.cycle_length.unwrap_or(existing.cycle_length);
    let period_length = body.period_length.unwrap_or(existing.period_length);
    validate_cycle(start_date, cycle_length, period_length, today)?;

    let query = format!(
        "UPDATE menstrual_cycles SET \
            start_date = $3, cycle_length = $4, period_length = $5, updated_at = now() \
         WHERE id = $1 AND user_id = $2 \
         RETURNING {COLUMNS}"
    );
    let cycle = sqlx::query_as::<_, MenstrualCycle>(&query)
        .bind(id)
        .bind(user.user_id)
        .bind(start_date)
        .bind(cycle_length)
        .bind(period_length)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Cycle"))?;

    Ok(Json(cycle))
}

async fn delete_cycle(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    let result = sqlx::query("DELETE FROM menstrual_cycles WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Cycle"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn accepts_defaults() {
        let today = date("2025-05-01");
        assert!(validate_cycle(date("2025-04-20"), 28, 5, today).is_ok());
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        let today = date("2025-05-01");
        assert!(validate_cycle(today, 20, 5, today).is_err());
        assert!(validate_cycle(today, 46, 5, today).is_err());
        assert!(validate_cycle(today, 28, 0, today).is_err());
        assert!(validate_cycle(today, 28, 11, today).is_err());
    }

    #[test]
    fn period_must_be_shorter_than_cycle() {
        let today = date("2025-05-01");
        assert!(validate_cycle(today, 21, 10, today).is_ok());
        assert!(validate_cycle(today, 21, 21, today).is_err());
    }

    #[test]
    fn rejects_future_start() {
        let today = date("2025-05-01");
        assert!(validate_cycle(date("2025-05-02"), 28, 5, today).is_err());
    }

    #[test]
    fn update_checks_provided_fields_alone() {
        let today = date("2025-05-01");
        let update = |start_date, cycle_length, period_length| UpdateCycle {
            start_date,
            cycle_length,
            period_length,
        };

        assert!(update(None, None, None).validate(today).is_ok());
        assert!(update(None, Some(30), None).validate(today).is_ok());
        assert!(update(None, Some(100), None).validate(today).is_err());
        assert!(update(None, None, Some(0)).validate(today).is_err());
        assert!(update(Some(date("2025-05-03")), None, None).validate(today).is_err());
    }
}
