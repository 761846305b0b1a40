use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::models::{Relationship, RelationshipMember, RelationshipWithRole};
use crate::state::AppState;
use crate::validation;

const COLUMNS: &str = "id, name, relationship_type, created_by, created_at, updated_at";

pub const RELATIONSHIP_TYPES: [&str; 5] = ["romantic", "friendship", "family", "professional", "other"];
pub const ROLE_OWNER: &str = "owner";
const INVITABLE_ROLES: [&str; 2] = ["partner", "member"];

#[derive(Debug, Deserialize)]
pub struct CreateRelationship {
    pub name: String,
    pub relationship_type: String,
}

impl CreateRelationship {
    pub fn validate(&self) -> AppResult<()> {
        validation::text("name", &self.name, 1, 100)?;
        validate_relationship_type(&self.relationship_type)
    }
}

pub fn validate_relationship_type(value: &str) -> AppResult<()> {
    if RELATIONSHIP_TYPES.contains(&value) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "relationship_type must be one of: {}",
            RELATIONSHIP_TYPES.join(", ")
        )))
    }
}

#[derive(Debug, Deserialize)]
pub struct AddMember {
    pub user_id: Uuid,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "partner".to_string()
}

#[derive(Serialize)]
pub struct RelationshipDetail {
    #[serde(flatten)]
    relationship: Relationship,
    my_role: String,
    members: Vec<RelationshipMember>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/relationships",
            get(list_relationships).post(create_relationship),
        )
        .route(
            "/relationships/{id}",
            get(get_relationship).delete(delete_relationship),
        )
        .route("/relationships/{id}/members", post(add_member))
}

/// The caller's role in the relationship. 404 if it doesn't exist, 403 if the
/// caller isn't a member.
pub(crate) async fn require_member(
    pool: &PgPool,
    relationship_id: Uuid,
    user_id: Uuid,
) -> AppResult<String> {
    let role: Option<String> = sqlx::query_scalar(
        "SELECT role FROM relationship_members WHERE relationship_id = $1 AND user_id = $2",
    )
    .bind(relationship_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    if let Some(role) = role {
        return Ok(role);
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM relationships WHERE id = $1)")
        .bind(relationship_id)
        .fetch_one(pool)
        .await?;

    if exists {
        Err(AppError::Forbidden(
            "You are not a member of this relationship".into(),
        ))
    } else {
        Err(AppError::NotFound("Relationship"))
    }
}

async fn require_owner(pool: &PgPool, relationship_id: Uuid, user_id: Uuid) -> AppResult<()> {
    let role = require_member(pool, relationship_id, user_id).await?;
    if role == ROLE_OWNER {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only the relationship owner can do that".into(),
        ))
    }
}

async fn create_relationship(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateRelationship>,
) -> AppResult<(StatusCode, Json<Relationship>)> {
    body.validate()?;

    let mut tx = state.pool.begin().await?;
    let relationship = insert_relationship(&mut tx, user.user_id, body.name.trim(), &body.relationship_type).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %user.user_id,
        relationship_id = %relationship.id,
        "Relationship created"
    );
    Ok((StatusCode::CREATED, Json(relationship)))
}

/// Insert a relationship with `owner_id` as its owner. Shared with onboarding.
pub(crate) async fn insert_relationship(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    owner_id: Uuid,
    name: &str,
    relationship_type: &str,
) -> Result<Relationship, sqlx::Error> {
    let query = format!(
        "INSERT INTO relationships (name, relationship_type, created_by) \
         VALUES ($1, $2, $3) RETURNING {COLUMNS}"
    );
    let relationship = sqlx::query_as::<_, Relationship>(&query)
        .bind(name)
        .bind(relationship_type)
        .bind(owner_id)
        .fetch_one(&mut **tx)
        .await?;

    sqlx::query(
        "INSERT INTO relationship_members (relationship_id, user_id, role) VALUES ($1, $2, $3)",
    )
    .bind(relationship.id)
    .bind(owner_id)
    .bind(ROLE_OWNER)
    .execute(&mut **tx)
    .await?;

    Ok(relationship)
}

async fn list_relationships(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<RelationshipWithRole>>> {
    let rows = sqlx::query_as::<_, RelationshipWithRole>(
        "SELECT r.id, r.name, r.relationship_type, m.role, r.created_at \
         FROM relationships r \
         JOIN relationship_members m ON m.relationship_id = r.id \
         WHERE m.user_id = $1 \
         ORDER BY r.created_at ASC",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

async fn get_relationship(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<RelationshipDetail>> {
    let my_role = require_member(&state.pool, id, user.user_id).await?;

    let query = format!("SELECT {COLUMNS} FROM relationships WHERE id = $1");
    let relationship = sqlx::query_as::<_, Relationship>(&query)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Relationship"))?;

    let members = sqlx::query_as::<_, RelationshipMember>(
        "SELECT relationship_id, user_id, role, joined_at \
         FROM relationship_members WHERE relationship_id = $1 ORDER BY joined_at ASC",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(RelationshipDetail {
        relationship,
        my_role,
        members,
    }))
}

async fn delete_relationship(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    require_owner(&state.pool, id, user.user_id).await?;

    sqlx::query("DELETE FROM relationships WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    tracing::info!(user_id = %user.user_id, relationship_id = %id, "Relationship deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<AddMember>,
) -> AppResult<(StatusCode, Json<RelationshipMember>)> {
    if !INVITABLE_ROLES.contains(&body.role.as_str()) {
        return Err(AppError::BadRequest(format!(
            "role must be one of: {}",
            INVITABLE_ROLES.join(", ")
        )));
    }
    if body.user_id == user.user_id {
        return Err(AppError::BadRequest(
            "You are already a member of this relationship".into(),
        ));
    }

    require_owner(&state.pool, id, user.user_id).await?;

    let member = sqlx::query_as::<_, RelationshipMember>(
        "INSERT INTO relationship_members (relationship_id, user_id, role) \
         VALUES ($1, $2, $3) \
         RETURNING relationship_id, user_id, role, joined_at",
    )
    .bind(id)
    .bind(body.user_id)
    .bind(&body.role)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        relationship_id = %id,
        member_id = %body.user_id,
        role = %body.role,
        "Member added"
    );
    Ok((StatusCode::CREATED, Json(member)))
}
