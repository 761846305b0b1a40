use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::models::{OnboardingResponse, Relationship};
use crate::routes::profile::ensure_profile;
use crate::routes::relationships::{insert_relationship, validate_relationship_type};
use crate::state::AppState;
use crate::validation;

const COLUMNS: &str = "id, user_id, relationship_type, goals, answers, created_at";
const MAX_GOALS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct SubmitOnboarding {
    pub relationship_type: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default = "empty_object")]
    pub answers: serde_json::Value,
    /// Creates the user's first relationship when present.
    pub relationship_name: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl SubmitOnboarding {
    pub fn validate(&self) -> AppResult<()> {
        validate_relationship_type(&self.relationship_type)?;
        if self.goals.len() > MAX_GOALS {
            return Err(AppError::BadRequest(format!(
                "at most {MAX_GOALS} goals are allowed"
            )));
        }
        for goal in &self.goals {
            validation::text("goals", goal, 1, 100)?;
        }
        if !self.answers.is_object() {
            return Err(AppError::BadRequest("answers must be a JSON object".into()));
        }
        if let Some(name) = &self.relationship_name {
            validation::text("relationship_name", name, 1, 100)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct OnboardingStatus {
    completed: bool,
    response: Option<OnboardingResponse>,
}

#[derive(Serialize)]
pub struct OnboardingResult {
    response: OnboardingResponse,
    relationship: Option<Relationship>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/onboarding", get(get_status).post(submit))
}

async fn get_status(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<OnboardingStatus>> {
    let profile = ensure_profile(&state.pool, &user).await?;

    let query = format!(
        "SELECT {COLUMNS} FROM onboarding_responses WHERE user_id = $1 \
         ORDER BY created_at DESC LIMIT 1"
    );
    let response = sqlx::query_as::<_, OnboardingResponse>(&query)
        .bind(user.user_id)
        .fetch_optional(&state.pool)
        .await?;

    Ok(Json(OnboardingStatus {
        completed: profile.onboarding_completed,
        response,
    }))
}

async fn submit(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<SubmitOnboarding>,
) -> AppResult<(StatusCode, Json<OnboardingResult>)> {
    body.validate()?;
    ensure_profile(&state.pool, &user).await?;

    let goals: Vec<String> = body.goals.iter().map(|g| g.trim().to_string()).collect();

    let mut tx = state.pool.begin().await?;

    let query = format!(
        "INSERT INTO onboarding_responses (user_id, relationship_type, goals, answers) \
         VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
    );
    let response = sqlx::query_as::<_, OnboardingResponse>(&query)
        .bind(user.user_id)
        .bind(&body.relationship_type)
        .bind(&goals)
        .bind(&body.answers)
        .fetch_one(&mut *tx)
        .await?;

    let relationship = match body.relationship_name.as_deref() {
        Some(name) => Some(
            insert_relationship(&mut tx, user.user_id, name.trim(), &body.relationship_type)
                .await?,
        ),
        None => None,
    };

    sqlx::query(
        "UPDATE profiles SET onboarding_completed = TRUE, updated_at = now() WHERE id = $1",
    )
    .bind(user.user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        user_id = %user.user_id,
        goals = goals.len(),
        created_relationship = relationship.is_some(),
        "Onboarding completed"
    );
    Ok((
        StatusCode::CREATED,
        Json(OnboardingResult {
            response,
            relationship,
        }),
    ))
}
