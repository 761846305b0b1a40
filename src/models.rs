use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub timezone: String,
    pub email_insights: bool,
    pub daily_reminder: bool,
    pub partner_suggestions_enabled: bool,
    pub onboarding_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Relationship {
    pub id: Uuid,
    pub name: String,
    pub relationship_type: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A relationship as seen by one of its members.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RelationshipWithRole {
    pub id: Uuid,
    pub name: String,
    pub relationship_type: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RelationshipMember {
    pub relationship_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub relationship_id: Option<Uuid>,
    pub content: String,
    pub mood_score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DailyCheckin {
    pub id: Uuid,
    pub user_id: Uuid,
    pub relationship_id: Uuid,
    pub checkin_date: NaiveDate,
    pub connection_score: i32,
    pub mood_score: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MenstrualCycle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub start_date: NaiveDate,
    pub cycle_length: i32,
    pub period_length: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RelationshipInsight {
    pub id: Uuid,
    pub user_id: Uuid,
    pub relationship_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub priority: i32,
    pub source: String,
    pub is_read: bool,
    pub is_dismissed: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PartnerSuggestion {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub relationship_id: Uuid,
    #[serde(skip_serializing)]
    pub source_insight_id: Option<Uuid>,
    pub kind: String,
    pub suggestion: String,
    pub relevance_score: i32,
    pub is_read: bool,
    pub is_dismissed: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OnboardingResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub relationship_type: String,
    pub goals: Vec<String>,
    pub answers: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PremiumSubscription {
    pub user_id: Uuid,
    pub stripe_subscription_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub updated_at: DateTime<Utc>,
}

impl PremiumSubscription {
    pub fn is_premium_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
            && self.current_period_end.map_or(true, |end| end > now)
    }
}
