use std::env;
use std::fmt::Display;
use std::str::FromStr;

use secrecy::SecretString;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Runtime configuration, read once from the environment at startup.
///
/// | Env Var                    | Required | Default                  |
/// |----------------------------|----------|--------------------------|
/// | `DATABASE_URL`             | **yes**  | --                       |
/// | `AUTH_JWT_SECRET`          | **yes**  | --                       |
/// | `CRON_SECRET`              | **yes**  | --                       |
/// | `STRIPE_SECRET_KEY`        | **yes**  | --                       |
/// | `STRIPE_WEBHOOK_SECRET`    | **yes**  | --                       |
/// | `STRIPE_PRICE_MONTHLY`     | **yes**  | --                       |
/// | `STRIPE_PRICE_YEARLY`      | **yes**  | --                       |
/// | `HOST`                     | no       | `0.0.0.0`                |
/// | `PORT`                     | no       | `3050`                   |
/// | `DATABASE_MAX_CONNECTIONS` | no       | `5`                      |
/// | `RUN_MIGRATIONS`           | no       | `true`                   |
/// | `APP_BASE_URL`             | no       | `http://localhost:3000`  |
/// | `CORS_ORIGINS`             | no       | `http://localhost:3000`  |
/// | `LLM_API_KEY`              | no       | unset (LLM disabled)     |
/// | `LLM_MODEL`                | no       | `claude-3-5-haiku-latest`|
/// | `LLM_MAX_TOKENS`           | no       | `400`                    |
/// | `CRON_LLM_DELAY_MS`        | no       | `1000`                   |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: SecretString,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub app_base_url: String,
    pub cors_origins: Vec<String>,
    pub auth_jwt_secret: SecretString,
    pub cron_secret: SecretString,
    pub stripe: StripeConfig,
    pub llm: Option<LlmConfig>,
    pub cron_llm_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    pub price_monthly: String,
    pub price_yearly: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm = match optional("LLM_API_KEY") {
            Some(key) => Some(LlmConfig {
                api_key: SecretString::from(key),
                model: or_default("LLM_MODEL", "claude-3-5-haiku-latest"),
                max_tokens: parse_or("LLM_MAX_TOKENS", 400)?,
            }),
            None => {
                info!("LLM_API_KEY not set, generated text falls back to built-in copy");
                None
            }
        };

        let app_base_url = or_default("APP_BASE_URL", "http://localhost:3000");

        let cors_origins = or_default("CORS_ORIGINS", &app_base_url)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: or_default("HOST", "0.0.0.0"),
            port: parse_or("PORT", 3050)?,
            database_url: secret("DATABASE_URL")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            run_migrations: parse_or("RUN_MIGRATIONS", true)?,
            app_base_url,
            cors_origins,
            auth_jwt_secret: secret("AUTH_JWT_SECRET")?,
            cron_secret: secret("CRON_SECRET")?,
            stripe: StripeConfig {
                secret_key: secret("STRIPE_SECRET_KEY")?,
                webhook_secret: secret("STRIPE_WEBHOOK_SECRET")?,
                price_monthly: required("STRIPE_PRICE_MONTHLY")?,
                price_yearly: required("STRIPE_PRICE_YEARLY")?,
            },
            llm,
            cron_llm_delay_ms: parse_or("CRON_LLM_DELAY_MS", 1000)?,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn secret(key: &'static str) -> Result<SecretString, ConfigError> {
    required(key).map(SecretString::from)
}

fn or_default(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
