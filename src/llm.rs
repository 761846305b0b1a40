//! Client for the hosted LLM (Anthropic Messages API).
//!
//! Used to rewrite heuristic insight copy for premium members and to write
//! journal reflections. Callers decide what to do on failure; nothing here
//! retries.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::LlmConfig;
use crate::insights::InsightKind;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const COACH_SYSTEM_PROMPT: &str = "You are a warm, practical relationship coach. \
Write in second person, plain language, no more than three sentences. \
Never diagnose, never mention that you are an AI, and never quote the user's private notes back verbatim.";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("invalid API key header")]
    InvalidApiKey,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("response contained no text")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<LlmClientInner>,
}

struct LlmClientInner {
    client: reqwest::Client,
    model: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(config.api_key.expose_secret())
                .map_err(|_| LlmError::InvalidApiKey)?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: Arc::new(LlmClientInner {
                client,
                model: config.model.clone(),
                max_tokens: config.max_tokens,
            }),
        })
    }

    /// Single-turn completion. Text blocks are concatenated in order.
    #[instrument(skip(self, system, prompt), fields(model = %self.inner.model))]
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.inner.model,
            max_tokens: self.inner.max_tokens,
            system,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .inner
            .client
            .post(ANTHROPIC_API_URL)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorResponse>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response.json().await?;
        collect_text(body)
    }

    pub async fn rewrite_insight(
        &self,
        kind: InsightKind,
        title: &str,
        body: &str,
        context: &str,
    ) -> Result<String, LlmError> {
        self.complete(COACH_SYSTEM_PROMPT, &insight_prompt(kind, title, body, context))
            .await
    }

    pub async fn reflect_on_journal(
        &self,
        content: &str,
        mood_score: Option<i32>,
    ) -> Result<String, LlmError> {
        self.complete(COACH_SYSTEM_PROMPT, &reflection_prompt(content, mood_score))
            .await
    }
}

fn collect_text(body: MessagesResponse) -> Result<String, LlmError> {
    let text = body
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    let text = text.trim();
    if text.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text.to_string())
}

pub fn insight_prompt(kind: InsightKind, title: &str, body: &str, context: &str) -> String {
    format!(
        "Rewrite this relationship insight so it feels personal and encouraging.\n\
         Category: {kind}\n\
         Title: {title}\n\
         Draft: {body}\n\
         Recent signals: {context}\n\
         Reply with the rewritten insight text only.",
        kind = kind.as_str(),
    )
}

pub fn reflection_prompt(content: &str, mood_score: Option<i32>) -> String {
    let mood = mood_score
        .map(|m| format!("{m}/10"))
        .unwrap_or_else(|| "not recorded".to_string());
    format!(
        "Here is a journal entry about a relationship (mood {mood}).\n\
         ---\n{content}\n---\n\
         Offer a short reflection: one observation and one gentle question to consider."
    )
}
