use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::models::Profile;
use crate::state::AppState;
use crate::validation;

const COLUMNS: &str = "id, email, display_name, timezone, email_insights, daily_reminder, \
    partner_suggestions_enabled, onboarding_completed, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct UpdateProfile {
    pub display_name: Option<String>,
    pub timezone: Option<String>,
    pub email_insights: Option<bool>,
    pub daily_reminder: Option<bool>,
    pub partner_suggestions_enabled: Option<bool>,
}

impl UpdateProfile {
    fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.display_name {
            validation::text("display_name", name, 1, 80)?;
        }
        if let Some(tz) = &self.timezone {
            validation::text("timezone", tz, 1, 64)?;
        }
        Ok(())
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/profile", get(get_profile).put(update_profile))
}

/// Profiles are created lazily the first time a signed-in user shows up.
pub(crate) async fn ensure_profile(pool: &PgPool, user: &AuthUser) -> Result<Profile, sqlx::Error> {
    let query = format!(
        "INSERT INTO profiles (id, email) VALUES ($1, $2) \
         ON CONFLICT (id) DO UPDATE SET email = COALESCE(EXCLUDED.email, profiles.email) \
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, Profile>(&query)
        .bind(user.user_id)
        .bind(&user.email)
        .fetch_one(pool)
        .await
}

async fn get_profile(user: AuthUser, State(state): State<AppState>) -> AppResult<Json<Profile>> {
    Ok(Json(ensure_profile(&state.pool, &user).await?))
}

async fn update_profile(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<UpdateProfile>,
) -> AppResult<Json<Profile>> {
    body.validate()?;
    ensure_profile(&state.pool, &user).await?;

    let query = format!(
        "UPDATE profiles SET \
            display_name = COALESCE($2, display_name), \
            timezone = COALESCE($3, timezone), \
            email_insights = COALESCE($4, email_insights), \
            daily_reminder = COALESCE($5, daily_reminder), \
            partner_suggestions_enabled = COALESCE($6, partner_suggestions_enabled), \
            updated_at = now() \
         WHERE id = $1 \
         RETURNING {COLUMNS}"
    );
    let profile = sqlx::query_as::<_, Profile>(&query)
        .bind(user.user_id)
        .bind(body.display_name.as_deref().map(str::trim))
        .bind(body.timezone.as_deref().map(str::trim))
        .bind(body.email_insights)
        .bind(body.daily_reminder)
        .bind(body.partner_suggestions_enabled)
        .fetch_one(&state.pool)
        .await?;

    tracing::info!(user_id = %user.user_id, "Profile updated");
    Ok(Json(profile))
}
