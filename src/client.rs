//! Retrying client for an OpenAI-compatible chat-completions endpoint.
//!
//! Both the medical analysis and the remote OCR backend go through
//! [`ApiClient::send`]. The client owns the whole failure story of a
//! remote call so callers only ever see the text or one [`ApiError`].
//!
//! ## Retry Strategy
//!
//! A call is a small state machine ([`RetryState`]):
//!
//! ```text
//! Attempting(0) ──ok──▶ Succeeded
//!      │
//!    fail ──▶ Backoff{0, d} ──sleep d──▶ Attempting(1) ──▶ … ──▶ Exhausted
//! ```
//!
//! * HTTP 429 waits for the server's `Retry-After` when present (capped at
//!   `max_delay`), otherwise for the policy backoff `min(base * 2^n, cap)`.
//! * Network errors, timeouts, 5xx and empty completions use the policy
//!   backoff.
//! * Other 4xx responses and undecodable bodies stop immediately.
//!
//! Sleeping and HTTP are behind the [`Sleeper`] and [`Transport`] traits
//! so the loop can be driven deterministically in tests.

use crate::config::{ApiConfig, RetryPolicy};
use crate::error::{ApiError, MedOcrError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest slice of an error body kept in an [`ApiError`].
const MAX_ERROR_BODY_CHARS: usize = 500;

// ── Wire types ───────────────────────────────────────────────────────────

/// Chat-completions request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        });
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        });
        self
    }

    /// User turn carrying an instruction and one image (as a URL or data URI).
    pub fn user_with_image(mut self, text: impl Into<String>, image_url: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                        detail: Some("high".to_string()),
                    },
                },
            ]),
        });
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Plain text, or an array of typed parts for multimodal turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    /// Some gateways report upstream failures in a 200 body.
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

// ── Seams ────────────────────────────────────────────────────────────────

/// Raw HTTP reply, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    /// Raw `Retry-After` header value, if any.
    pub retry_after: Option<String>,
    pub body: String,
}

/// The request never produced an HTTP status (connect error, timeout, …).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one JSON POST with a bearer token.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        credential: &str,
        body: &ChatRequest,
    ) -> Result<HttpReply, TransportError>;
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, MedOcrError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MedOcrError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        credential: &str,
        body: &ChatRequest,
    ) -> Result<HttpReply, TransportError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(credential)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError(format!("request timed out: {e}"))
                } else {
                    TransportError(format!("request error: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("failed reading body: {e}")))?;

        Ok(HttpReply {
            status,
            retry_after,
            body,
        })
    }
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

// ── Retry state machine ──────────────────────────────────────────────────

/// Why one attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// HTTP 429, with the parsed `Retry-After` hint.
    RateLimited(Option<Duration>),
    /// Network error, timeout or 5xx.
    Transient(String),
    /// Success status but no completion text.
    Empty,
    /// Not worth retrying.
    Fatal(ApiError),
}

impl AttemptFailure {
    fn into_error(self, attempts: u32) -> ApiError {
        match self {
            AttemptFailure::RateLimited(retry_after) => ApiError::RateLimited {
                attempts,
                retry_after,
            },
            AttemptFailure::Transient(detail) => ApiError::RequestFailed { attempts, detail },
            AttemptFailure::Empty => ApiError::EmptyResponse { attempts },
            AttemptFailure::Fatal(e) => e,
        }
    }
}

/// State of one [`ApiClient::send`] call. Attempt numbers are 0-based.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    Attempting(u32),
    Backoff { attempt: u32, delay: Duration },
    Succeeded(String),
    Exhausted(ApiError),
}

impl RetryState {
    /// Transition after attempt `attempt` failed.
    pub fn after_failure(policy: &RetryPolicy, attempt: u32, failure: AttemptFailure) -> Self {
        let attempts_made = attempt + 1;
        if let AttemptFailure::Fatal(e) = failure {
            return RetryState::Exhausted(e);
        }
        if attempts_made >= policy.max_attempts {
            return RetryState::Exhausted(failure.into_error(attempts_made));
        }
        let delay = match failure {
            AttemptFailure::RateLimited(Some(hint)) => hint.min(policy.max_delay),
            _ => policy.backoff(attempt),
        };
        RetryState::Backoff { attempt, delay }
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Values that do not fit a [`Duration`] are ignored.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let v = value.trim();
    if let Ok(secs) = v.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = v.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let when = DateTime::parse_from_rfc2822(v).ok()?.with_timezone(&Utc);
    Some((when - now).to_std().unwrap_or(Duration::ZERO))
}

// ── Client ───────────────────────────────────────────────────────────────

/// Retrying chat-completions client.
#[derive(Clone)]
pub struct ApiClient {
    endpoint: String,
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        endpoint: impl Into<String>,
        policy: RetryPolicy,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
            transport,
            sleeper,
        }
    }

    /// Client using `reqwest` and real sleeps.
    pub fn from_config(api: &ApiConfig, policy: RetryPolicy) -> Result<Self, MedOcrError> {
        let transport = ReqwestTransport::new(Duration::from_secs(api.timeout_secs))?;
        Ok(Self::new(
            api.endpoint.clone(),
            policy,
            Arc::new(transport),
            Arc::new(TokioSleeper),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `request`, retrying per the policy, and return the first
    /// completion's message content.
    pub async fn send(&self, request: &ChatRequest, credential: &str) -> Result<String, ApiError> {
        let max = self.policy.max_attempts;
        let mut state = RetryState::Attempting(0);

        loop {
            state = match state {
                RetryState::Attempting(n) => {
                    debug!(
                        "POST {} model={} attempt {}/{}",
                        self.endpoint,
                        request.model,
                        n + 1,
                        max
                    );
                    match self.attempt(request, credential).await {
                        Ok(text) => RetryState::Succeeded(text),
                        Err(failure) => {
                            warn!("Attempt {}/{} failed: {:?}", n + 1, max, failure);
                            RetryState::after_failure(&self.policy, n, failure)
                        }
                    }
                }
                RetryState::Backoff { attempt, delay } => {
                    warn!("Retry {}/{} after {:?}", attempt + 2, max, delay);
                    self.sleeper.sleep(delay).await;
                    RetryState::Attempting(attempt + 1)
                }
                RetryState::Succeeded(text) => return Ok(text),
                RetryState::Exhausted(err) => return Err(err),
            };
        }
    }

    /// One system message plus one user message.
    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        credential: &str,
    ) -> Result<String, ApiError> {
        let request = ChatRequest::new(model).system(system).user(user);
        self.send(&request, credential).await
    }

    async fn attempt(&self, request: &ChatRequest, credential: &str) -> Result<String, AttemptFailure> {
        let reply = self
            .transport
            .post_json(&self.endpoint, credential, request)
            .await
            .map_err(|e| AttemptFailure::Transient(e.to_string()))?;

        match reply.status {
            200..=299 => parse_completion(&reply.body),
            429 => Err(AttemptFailure::RateLimited(
                reply
                    .retry_after
                    .as_deref()
                    .and_then(|v| parse_retry_after(v, Utc::now())),
            )),
            500..=599 => Err(AttemptFailure::Transient(format!(
                "HTTP {}: {}",
                reply.status,
                truncate(&reply.body)
            ))),
            status => Err(AttemptFailure::Fatal(ApiError::Rejected {
                status,
                body: truncate(&reply.body),
            })),
        }
    }
}

fn parse_completion(body: &str) -> Result<String, AttemptFailure> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AttemptFailure::Fatal(ApiError::MalformedResponse(e.to_string())))?;

    if let Some(err) = response.error {
        return Err(AttemptFailure::Transient(format!(
            "upstream error: {}",
            truncate(&err.message)
        )));
    }

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        Err(AttemptFailure::Empty)
    } else {
        Ok(content)
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
