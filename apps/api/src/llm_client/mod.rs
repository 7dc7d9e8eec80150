/// LLM Client: the generative text backend used by the Standardizer, the
/// Keyword Extractor, the LLM evaluator and the Retailor.
///
/// Callers depend on the `TextBackend` trait, never on `LlmClient` directly,
/// so the pipelines run against a scripted backend in tests.
///
/// No stage retries a failed call. `LlmClient` only loops when it was built
/// with `max_attempts > 1`, which is an operator decision (`LLM_MAX_ATTEMPTS`).
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::PipelineError;

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication rejected (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => PipelineError::BackendTimeout,
            LlmError::Http(ref inner) if inner.is_timeout() => PipelineError::BackendTimeout,
            LlmError::Http(ref inner) if inner.is_connect() => {
                PipelineError::BackendUnavailable(inner.to_string())
            }
            LlmError::Auth { message, .. } => PipelineError::BackendAuthError(message),
            LlmError::RateLimited { .. } => PipelineError::BackendRateLimited,
            LlmError::Parse(inner) => PipelineError::ResponseParseError(inner.to_string()),
            other => PipelineError::Backend(other.to_string()),
        }
    }
}

/// `prompt → text`. Implementations surface timeouts, auth failures and rate
/// limiting as distinct errors and do not retry on the caller's behalf.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Anthropic Messages API client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    max_attempts: u32,
}

impl LlmClient {
    pub fn new(api_key: String, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Makes a raw call to the Messages API, returning the full response object.
    /// With `max_attempts > 1`, 429 and 5xx responses are retried with
    /// exponential backoff; 401/403 never are.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, LlmError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1).min(5)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    last_error = Some(LlmError::Timeout);
                    continue;
                }
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Auth {
                    status: status.as_u16(),
                    message: api_message(body),
                });
            }

            if status.as_u16() == 429 {
                warn!("LLM API rate limited the request");
                last_error = Some(LlmError::RateLimited {
                    attempts: attempt + 1,
                });
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message: api_message(body),
                });
            }

            let llm_response: LlmResponse = response.json().await?;

            debug!(
                "LLM call succeeded: input_tokens={}, output_tokens={}",
                llm_response.usage.input_tokens, llm_response.usage.output_tokens
            );

            return Ok(llm_response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            attempts: self.max_attempts,
        }))
    }
}

fn api_message(body: String) -> String {
    serde_json::from_str::<AnthropicError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

#[async_trait]
impl TextBackend for LlmClient {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let response = self.call(prompt, system).await?;
        let text = response.text().ok_or(LlmError::EmptyContent)?;
        if text.trim().is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text.to_string())
    }
}

/// Strips non-JSON wrapping from a backend response: markdown code fences
/// (with or without a language tag) and any prose around the payload.
///
/// Prose may itself contain brackets (`Result [v2]: {...}`), so every `{`/`[`
/// is tried as a start, up to its last matching closer, and the first slice
/// that is valid JSON wins. With no valid slice the first candidate is
/// returned and the parse error surfaces to the caller.
pub fn clean_json_response(text: &str) -> &str {
    let unfenced = strip_code_fence(text.trim());

    let mut first = None;
    for (start, opener) in unfenced.match_indices(&['{', '['][..]) {
        let closer = if opener == "{" { '}' } else { ']' };
        let candidate = match unfenced.rfind(closer) {
            Some(end) if end > start => &unfenced[start..=end],
            _ => &unfenced[start..],
        };
        if serde_json::from_str::<serde::de::IgnoredAny>(candidate).is_ok() {
            return candidate;
        }
        first.get_or_insert(candidate);
    }
    first.unwrap_or(unfenced)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // Language tag, e.g. ```json
    let body_start = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len());
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Cleans and parses a backend response into `T`.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, PipelineError> {
    let cleaned = clean_json_response(raw);
    serde_json::from_str(cleaned).map_err(|e| PipelineError::ResponseParseError(e.to_string()))
}

/// Calls the backend and parses the cleaned response as JSON.
pub async fn complete_json<T: DeserializeOwned>(
    backend: &dyn TextBackend,
    prompt: &str,
    system: &str,
) -> Result<T, PipelineError> {
    let raw = backend.complete(prompt, system).await?;
    parse_json_response(&raw)
}
