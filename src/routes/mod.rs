pub mod billing;
pub mod checkins;
pub mod cron;
pub mod cycle;
pub mod cycle_stats;
pub mod dashboard;
pub mod health;
pub mod insights;
pub mod journal;
pub mod onboarding;
pub mod profile;
pub mod relationships;
pub mod suggestions;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Everything mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(profile::routes())
        .merge(relationships::routes())
        .merge(journal::routes())
        .merge(checkins::routes())
        .merge(cycle::routes())
        .merge(cycle_stats::routes())
        .merge(dashboard::routes())
        .merge(insights::routes())
        .merge(suggestions::routes())
        .merge(onboarding::routes())
        .merge(billing::routes())
        .merge(webhooks::routes())
        .merge(cron::routes())
}
