use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::llm::{LlmClient, LlmError};
use crate::stripe::{StripeClient, StripeError};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub stripe: StripeClient,
    /// `None` when no LLM key is configured.
    pub llm: Option<LlmClient>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to build Stripe client: {0}")]
    Stripe(#[from] StripeError),

    #[error("failed to build LLM client: {0}")]
    Llm(#[from] LlmError),
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig) -> Result<Self, StateError> {
        let stripe = StripeClient::new(&config.stripe)?;
        let llm = config.llm.as_ref().map(LlmClient::new).transpose()?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            stripe,
            llm,
        })
    }
}
