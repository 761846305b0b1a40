use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::models::JournalEntry;
use crate::routes::billing::is_premium;
use crate::routes::relationships::require_member;
use crate::state::AppState;
use crate::validation;

const COLUMNS: &str = "id, user_id, relationship_id, content, mood_score, created_at, updated_at";
const MAX_CONTENT_CHARS: usize = 10_000;
const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct NewJournalEntry {
    pub content: String,
    pub mood_score: Option<i32>,
    pub relationship_id: Option<Uuid>,
}

impl NewJournalEntry {
    pub fn validate(&self) -> AppResult<()> {
        validation::text("content", &self.content, 1, MAX_CONTENT_CHARS)?;
        if let Some(mood) = self.mood_score {
            validation::score("mood_score", mood)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateJournalEntry {
    pub content: Option<String>,
    pub mood_score: Option<i32>,
}

impl UpdateJournalEntry {
    fn validate(&self) -> AppResult<()> {
        if let Some(content) = &self.content {
            validation::text("content", content, 1, MAX_CONTENT_CHARS)?;
        }
        if let Some(mood) = self.mood_score {
            validation::score("mood_score", mood)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct JournalListQuery {
    pub relationship_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct Reflection {
    entry_id: Uuid,
    reflection: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/journal", get(list_entries).post(create_entry))
        .route(
            "/journal/{id}",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .route("/journal/{id}/reflection", post(reflect_on_entry))
}

async fn create_entry(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<NewJournalEntry>,
) -> AppResult<(StatusCode, Json<JournalEntry>)> {
    body.validate()?;

    if let Some(relationship_id) = body.relationship_id {
        require_member(&state.pool, relationship_id, user.user_id).await?;
    }

    let query = format!(
        "INSERT INTO journal_entries (user_id, relationship_id, content, mood_score) \
         VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
    );
    let entry = sqlx::query_as::<_, JournalEntry>(&query)
        .bind(user.user_id)
        .bind(body.relationship_id)
        .bind(body.content.trim())
        .bind(body.mood_score)
        .fetch_one(&state.pool)
        .await?;

    tracing::info!(user_id = %user.user_id, entry_id = %entry.id, "Journal entry saved");
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_entries(
    user: AuthUser,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<JournalListQuery>,
) -> AppResult<Json<Vec<JournalEntry>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::BadRequest("offset must not be negative".into()));
    }

    let query = format!(
        "SELECT {COLUMNS} FROM journal_entries \
         WHERE user_id = $1 AND ($2::uuid IS NULL OR relationship_id = $2) \
         ORDER BY created_at DESC \
         LIMIT $3 OFFSET $4"
    );
    let entries = sqlx::query_as::<_, JournalEntry>(&query)
        .bind(user.user_id)
        .bind(params.relationship_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(entries))
}

async fn find_entry(state: &AppState, id: Uuid, user_id: Uuid) -> AppResult<JournalEntry> {
    let query = format!("SELECT {COLUMNS} FROM journal_entries WHERE id = $1 AND user_id = $2");
    sqlx::query_as::<_, JournalEntry>(&query)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Journal entry"))
}

async fn get_entry(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<JournalEntry>> {
    Ok(Json(find_entry(&state, id, user.user_id).await?))
}

async fn update_entry(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<UpdateJournalEntry>,
) -> AppResult<Json<JournalEntry>> {
    body.validate()?;

    let query = format!(
        "UPDATE journal_entries SET \
            content = COALESCE($3, content), \
            mood_score = COALESCE($4, mood_score), \
            updated_at = now() \
         WHERE id = $1 AND user_id = $2 \
         RETURNING {COLUMNS}"
    );
    let entry = sqlx::query_as::<_, JournalEntry>(&query)
        .bind(id)
        .bind(user.user_id)
        .bind(body.content.as_deref().map(str::trim))
        .bind(body.mood_score)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Journal entry"))?;

    Ok(Json(entry))
}

async fn delete_entry(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    let result = sqlx::query("DELETE FROM journal_entries WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Journal entry"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn reflect_on_entry(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Reflection>> {
    let entry = find_entry(&state, id, user.user_id).await?;

    if !is_premium(&state.pool, user.user_id).await? {
        return Err(AppError::Forbidden(
            "Journal reflections are a premium feature".into(),
        ));
    }

    let llm = state
        .llm
        .as_ref()
        .ok_or_else(|| AppError::Internal("LLM is not configured".into()))?;

    let reflection = llm
        .reflect_on_journal(&entry.content, entry.mood_score)
        .await?;

    tracing::info!(user_id = %user.user_id, entry_id = %id, "Journal reflection generated");
    Ok(Json(Reflection {
        entry_id: id,
        reflection,
    }))
}
