use axum::extract::State;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::generation::{generate_for_member, GenerationOutcome};
use crate::insights::InsightSource;
use crate::models::RelationshipInsight;
use crate::routes::relationships::require_member;
use crate::state::AppState;

const COLUMNS: &str = "id, user_id, relationship_id, kind, title, body, priority, source, \
    is_read, is_dismissed, expires_at, created_at";

#[derive(Debug, Deserialize)]
pub struct InsightQuery {
    pub relationship_id: Option<Uuid>,
    #[serde(default)]
    pub include_read: bool,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub relationship_id: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/insights", get(list_insights))
        .route("/insights/generate", post(generate_insights))
        .route("/insights/{id}/read", patch(mark_read))
        .route("/insights/{id}/dismiss", patch(dismiss))
}

async fn list_insights(
    user: AuthUser,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<InsightQuery>,
) -> AppResult<Json<Vec<RelationshipInsight>>> {
    let query = format!(
        "SELECT {COLUMNS} FROM relationship_insights \
         WHERE user_id = $1 \
           AND ($2::uuid IS NULL OR relationship_id = $2) \
           AND ($3 OR NOT is_read) \
           AND NOT is_dismissed AND expires_at > now() \
         ORDER BY priority DESC, created_at DESC"
    );
    let rows = sqlx::query_as::<_, RelationshipInsight>(&query)
        .bind(user.user_id)
        .bind(params.relationship_id)
        .bind(params.include_read)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(rows))
}

async fn generate_insights(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<GenerateRequest>,
) -> AppResult<Json<GenerationOutcome>> {
    require_member(&state.pool, body.relationship_id, user.user_id).await?;
    let outcome =
        generate_for_member(&state, user.user_id, body.relationship_id, InsightSource::OnDemand)
            .await?;
    Ok(Json(outcome))
}

async fn set_flag(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    column: &str,
) -> AppResult<RelationshipInsight> {
    let query = format!(
        "UPDATE relationship_insights SET {column} = TRUE \
         WHERE id = $1 AND user_id = $2 RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, RelationshipInsight>(&query)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Insight"))
}

async fn mark_read(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<RelationshipInsight>> {
    Ok(Json(set_flag(&state, user.user_id, id, "is_read").await?))
}

async fn dismiss(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<RelationshipInsight>> {
    Ok(Json(set_flag(&state, user.user_id, id, "is_dismissed").await?))
}
