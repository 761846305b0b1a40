//! Turns recent rows into stored insights and partner suggestions.
//!
//! Used by the on-demand route and by the daily batch. Both go through
//! [`generate_for_member`] so the two paths never diverge.

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cycle::CycleSnapshot;
use crate::error::AppResult;
use crate::insights::{
    self, InsightInputs, InsightKind, InsightSource, CHECKIN_LOOKBACK_HOURS, INSIGHT_TTL_DAYS,
    JOURNAL_LOOKBACK_HOURS, SUGGESTION_TTL_DAYS,
};
use crate::models::{DailyCheckin, JournalEntry};
use crate::routes::billing::is_premium;
use crate::routes::cycle::active_cycle;
use crate::scoring::LOOKBACK_DAYS;
use crate::state::AppState;

const CHECKIN_COLUMNS: &str = crate::routes::checkins::COLUMNS;
const JOURNAL_COLUMNS: &str =
    "id, user_id, relationship_id, content, mood_score, created_at, updated_at";

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct GenerationOutcome {
    pub insights_created: usize,
    pub suggestions_created: usize,
    #[serde(skip)]
    pub used_llm: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DailyRunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub insights_created: usize,
    pub suggestions_created: usize,
    pub expired_purged: u64,
}

pub(crate) async fn recent_checkins(
    pool: &PgPool,
    user_id: Uuid,
    relationship_id: Uuid,
    since: DateTime<Utc>,
) -> Result<Vec<DailyCheckin>, sqlx::Error> {
    let query = format!(
        "SELECT {CHECKIN_COLUMNS} FROM daily_checkins \
         WHERE user_id = $1 AND relationship_id = $2 AND updated_at >= $3 \
         ORDER BY checkin_date ASC"
    );
    sqlx::query_as::<_, DailyCheckin>(&query)
        .bind(user_id)
        .bind(relationship_id)
        .bind(since)
        .fetch_all(pool)
        .await
}

/// Journal entries tied to this relationship or to none.
pub(crate) async fn recent_journals(
    pool: &PgPool,
    user_id: Uuid,
    relationship_id: Uuid,
    since: DateTime<Utc>,
) -> Result<Vec<JournalEntry>, sqlx::Error> {
    let query = format!(
        "SELECT {JOURNAL_COLUMNS} FROM journal_entries \
         WHERE user_id = $1 AND (relationship_id = $2 OR relationship_id IS NULL) \
           AND created_at >= $3 \
         ORDER BY created_at ASC"
    );
    sqlx::query_as::<_, JournalEntry>(&query)
        .bind(user_id)
        .bind(relationship_id)
        .bind(since)
        .fetch_all(pool)
        .await
}

async fn live_kinds(
    pool: &PgPool,
    user_id: Uuid,
    relationship_id: Uuid,
) -> Result<HashSet<InsightKind>, sqlx::Error> {
    let kinds: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT kind FROM relationship_insights \
         WHERE user_id = $1 AND relationship_id = $2 \
           AND NOT is_dismissed AND expires_at > now()",
    )
    .bind(user_id)
    .bind(relationship_id)
    .fetch_all(pool)
    .await?;

    Ok(kinds.iter().filter_map(|k| k.parse().ok()).collect())
}

/// Other members of the relationship who accept partner suggestions.
async fn suggestion_recipients(
    pool: &PgPool,
    relationship_id: Uuid,
    author_id: Uuid,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT m.user_id FROM relationship_members m \
         LEFT JOIN profiles p ON p.id = m.user_id \
         WHERE m.relationship_id = $1 AND m.user_id <> $2 \
           AND COALESCE(p.partner_suggestions_enabled, TRUE)",
    )
    .bind(relationship_id)
    .bind(author_id)
    .fetch_all(pool)
    .await
}

pub async fn generate_for_member(
    state: &AppState,
    user_id: Uuid,
    relationship_id: Uuid,
    source: InsightSource,
) -> AppResult<GenerationOutcome> {
    let pool = &state.pool;
    let now = Utc::now();

    let checkins = recent_checkins(
        pool,
        user_id,
        relationship_id,
        now - Duration::hours(CHECKIN_LOOKBACK_HOURS),
    )
    .await?;
    let journals = recent_journals(
        pool,
        user_id,
        relationship_id,
        now - Duration::hours(JOURNAL_LOOKBACK_HOURS),
    )
    .await?;
    let cycle_phase = active_cycle(pool, user_id).await?.and_then(|cycle| {
        CycleSnapshot::compute(
            cycle.start_date,
            cycle.cycle_length,
            cycle.period_length,
            now.date_naive(),
        )
        .map(|snapshot| snapshot.phase)
    });
    let live = live_kinds(pool, user_id, relationship_id).await?;
    let premium = is_premium(pool, user_id).await?;

    let inputs = InsightInputs {
        checkins: &checkins,
        journals: &journals,
        cycle_phase,
        now,
    };
    let mut selected = insights::select(insights::generate_candidates(&inputs), &live, premium);

    if selected.is_empty() {
        tracing::debug!(%user_id, %relationship_id, "No new insights");
        return Ok(GenerationOutcome::default());
    }

    let mut outcome = GenerationOutcome::default();

    if premium {
        if let Some(llm) = &state.llm {
            let context = insights::signals_summary(&inputs);
            for insight in selected.iter_mut() {
                match llm
                    .rewrite_insight(insight.kind, &insight.title, &insight.body, &context)
                    .await
                {
                    Ok(text) => {
                        insight.body = text;
                        outcome.used_llm = true;
                    }
                    Err(e) => tracing::warn!(
                        error = %e,
                        kind = %insight.kind,
                        "LLM rewrite failed, keeping default copy"
                    ),
                }
            }
        }
    }

    let recipients = suggestion_recipients(pool, relationship_id, user_id).await?;
    let insight_expiry = now + Duration::days(INSIGHT_TTL_DAYS);
    let suggestion_expiry = now + Duration::days(SUGGESTION_TTL_DAYS);

    let mut tx = pool.begin().await?;
    for insight in &selected {
        let insight_id: Uuid = sqlx::query_scalar(
            "INSERT INTO relationship_insights \
                (user_id, relationship_id, kind, title, body, priority, source, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
        )
        .bind(user_id)
        .bind(relationship_id)
        .bind(insight.kind.as_str())
        .bind(&insight.title)
        .bind(&insight.body)
        .bind(insight.priority)
        .bind(source.as_str())
        .bind(insight_expiry)
        .fetch_one(&mut *tx)
        .await?;
        outcome.insights_created += 1;

        let Some(draft) = insights::partner_suggestion(insight) else {
            continue;
        };
        for recipient in &recipients {
            sqlx::query(
                "INSERT INTO partner_suggestions \
                    (recipient_id, relationship_id, source_insight_id, kind, suggestion, relevance_score, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(recipient)
            .bind(relationship_id)
            .bind(insight_id)
            .bind(draft.kind.as_str())
            .bind(&draft.suggestion)
            .bind(draft.relevance_score)
            .bind(suggestion_expiry)
            .execute(&mut *tx)
            .await?;
            outcome.suggestions_created += 1;
        }
    }
    tx.commit().await?;

    tracing::info!(
        %user_id,
        %relationship_id,
        source = source.as_str(),
        insights = outcome.insights_created,
        suggestions = outcome.suggestions_created,
        "Insights generated"
    );
    Ok(outcome)
}

/// Has the daily job already run for this member today (UTC)?
async fn already_processed(
    pool: &PgPool,
    user_id: Uuid,
    relationship_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let start_of_day = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now);

    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM relationship_insights \
         WHERE user_id = $1 AND relationship_id = $2 AND source = 'daily' AND created_at >= $3)",
    )
    .bind(user_id)
    .bind(relationship_id)
    .bind(start_of_day)
    .fetch_one(pool)
    .await
}

async fn purge_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let suggestions = sqlx::query("DELETE FROM partner_suggestions WHERE expires_at < now()")
        .execute(pool)
        .await?
        .rows_affected();
    let insights = sqlx::query("DELETE FROM relationship_insights WHERE expires_at < now()")
        .execute(pool)
        .await?
        .rows_affected();
    Ok(suggestions + insights)
}

/// Generate daily insights for every member of every relationship with a
/// check-in in the last month. Members run one at a time; a failure is logged
/// and counted, and the run moves on.
pub async fn run_daily_batch(state: &AppState) -> AppResult<DailyRunSummary> {
    let now = Utc::now();
    let active_since = now.date_naive() - Duration::days(LOOKBACK_DAYS);
    let delay = StdDuration::from_millis(state.config.cron_llm_delay_ms);

    let members: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT m.relationship_id, m.user_id FROM relationship_members m \
         WHERE EXISTS (SELECT 1 FROM daily_checkins c \
                       WHERE c.relationship_id = m.relationship_id AND c.checkin_date >= $1) \
         ORDER BY m.relationship_id, m.user_id",
    )
    .bind(active_since)
    .fetch_all(&state.pool)
    .await?;

    let mut summary = DailyRunSummary::default();

    for (relationship_id, user_id) in members {
        match already_processed(&state.pool, user_id, relationship_id, now).await {
            Ok(true) => {
                summary.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, %user_id, %relationship_id, "❌ Daily check failed");
                summary.failed += 1;
                continue;
            }
        }

        match generate_for_member(state, user_id, relationship_id, InsightSource::Daily).await {
            Ok(outcome) => {
                summary.processed += 1;
                summary.insights_created += outcome.insights_created;
                summary.suggestions_created += outcome.suggestions_created;
                if outcome.used_llm {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %user_id, %relationship_id, "❌ Daily generation failed");
                summary.failed += 1;
            }
        }
    }

    summary.expired_purged = purge_expired(&state.pool).await?;

    tracing::info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        purged = summary.expired_purged,
        "Daily insight run finished"
    );
    Ok(summary)
}
