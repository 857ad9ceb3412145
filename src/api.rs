//! Chat-completions API interaction with exponential backoff retry logic.
//!
//! - [`ChatBackend`]: one system + user exchange with a chat model
//! - [`OpenAiChat`]: an OpenAI-compatible `/chat/completions` client
//! - [`RetryChat`]: decorator that retries transient failures of any backend
//!
//! # Retry Strategy
//!
//! - Only transient failures (transport errors, 429, 5xx) are retried
//! - Exponential backoff from a configurable base delay
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to every wait

use crate::config::ClassifierConfig;
use crate::error::ClassifyError;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// A chat model that answers one system + user exchange.
pub trait ChatBackend: Send + Sync {
    /// Send the two messages and return the model's reply text.
    fn complete(
        &self,
        system: &str,
        user: &str,
    ) -> impl Future<Output = Result<String, ClassifyError>> + Send;
}

/// Wrapper that adds exponential backoff retry logic to any [`ChatBackend`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryChat<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T: ChatBackend> RetryChat<T> {
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
        let delay = self.base_delay.saturating_mul(1 << exponent).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryChat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryChat")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: ChatBackend> ChatBackend for RetryChat<T> {
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifyError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            let e = match self.inner.complete(system, user).await {
                Ok(reply) => return Ok(reply),
                Err(e) => e,
            };
            attempt += 1;

            if !e.is_transient() || attempt > self.max_retries {
                error!(
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_attempt = attempt_t0.elapsed().as_millis(),
                    elapsed_ms_total = total_t0.elapsed().as_millis(),
                    error = %e,
                    "complete() giving up"
                );
                return Err(e);
            }

            let delay = self.backoff(attempt);
            warn!(
                attempt,
                max = self.max_retries,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis(),
                ?delay,
                error = %e,
                "complete() attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiChat {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Build a client. A missing or blank key is accepted here and reported
    /// per call as [`ClassifyError::MissingApiKey`], with no request sent.
    pub fn new(config: &ClassifierConfig, api_key: Option<String>) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatBackend for OpenAiChat {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifyError> {
        let api_key = self.api_key.as_deref().ok_or(ClassifyError::MissingApiKey)?;
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let t0 = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }

        let reply = response.json::<ChatResponse>().await?;
        debug!(elapsed_ms = t0.elapsed().as_millis(), "Chat completion received");
        reply
            .choices
            .into_iter()
            .next()
            .ok_or(ClassifyError::EmptyReply)
            .map(|choice| choice.message.content.unwrap_or_default())
    }
}
