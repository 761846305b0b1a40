use axum::extract::State;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::{AppPath, AppQuery};
use crate::models::PartnerSuggestion;
use crate::state::AppState;

const COLUMNS: &str = "id, recipient_id, relationship_id, source_insight_id, kind, suggestion, \
    relevance_score, is_read, is_dismissed, expires_at, created_at";

#[derive(Debug, Deserialize)]
pub struct SuggestionQuery {
    pub relationship_id: Option<Uuid>,
    #[serde(default)]
    pub include_read: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/partner-suggestions", get(list_suggestions))
        .route("/partner-suggestions/{id}/read", patch(mark_read))
        .route("/partner-suggestions/{id}/dismiss", patch(dismiss))
}

async fn list_suggestions(
    user: AuthUser,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<SuggestionQuery>,
) -> AppResult<Json<Vec<PartnerSuggestion>>> {
    let query = format!(
        "SELECT {COLUMNS} FROM partner_suggestions \
         WHERE recipient_id = $1 \
           AND ($2::uuid IS NULL OR relationship_id = $2) \
           AND ($3 OR NOT is_read) \
           AND NOT is_dismissed AND expires_at > now() \
         ORDER BY relevance_score DESC, created_at DESC"
    );
    let rows = sqlx::query_as::<_, PartnerSuggestion>(&query)
        .bind(user.user_id)
        .bind(params.relationship_id)
        .bind(params.include_read)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(rows))
}

async fn set_flag(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    column: &str,
) -> AppResult<PartnerSuggestion> {
    let query = format!(
        "UPDATE partner_suggestions SET {column} = TRUE \
         WHERE id = $1 AND recipient_id = $2 RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, PartnerSuggestion>(&query)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Partner suggestion"))
}

async fn mark_read(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<PartnerSuggestion>> {
    Ok(Json(set_flag(&state, user.user_id, id, "is_read").await?))
}

async fn dismiss(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<PartnerSuggestion>> {
    Ok(Json(set_flag(&state, user.user_id, id, "is_dismissed").await?))
}
