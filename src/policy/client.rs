//! Model completion collaborator. The policy treats it as a black box
//! request/response interface with possible timeout or error.

use super::{PolicyError, PolicyPhase};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenRouter-compatible chat completions endpoint.
const DEFAULT_COMPLETION_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const MAX_RATE_LIMIT_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 2000;

/// A rendered request: pure output of the policy's prompt phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// `(prompt) -> completion_text` with typed failure.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &Prompt) -> Result<String, PolicyError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// HTTP-backed completion client with a hard request timeout and
/// exponential backoff on rate limits.
///
/// The surrounding loop is synchronous, so the client owns a small tokio
/// runtime and blocks on each request.
pub struct HttpCompletionClient {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl HttpCompletionClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, PolicyError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| PolicyError::Backend(format!("failed to start client runtime: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyError::Backend(format!("failed to build http client: {e}")))?;

        Ok(Self {
            runtime,
            client,
            url: DEFAULT_COMPLETION_URL.to_string(),
            api_key,
            model,
            max_tokens: 4096,
            timeout,
        })
    }

    /// Point the client at a different endpoint (self-hosted gateways,
    /// test servers).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn request(&self, prompt: &Prompt) -> Result<String, PolicyError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: &prompt.system },
                Message { role: "user", content: &prompt.user },
            ],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut retry = 0u32;
        loop {
            let response = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            let status = response.status();
            let text = response.text().await.map_err(|e| self.classify(e))?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    PolicyError::Backend(format!("malformed completion response: {e}"))
                })?;
                let content = parsed
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default();
                return Ok(content);
            }

            if status.as_u16() == 429 && retry < MAX_RATE_LIMIT_RETRIES {
                let backoff = INITIAL_BACKOFF_MS << retry;
                retry += 1;
                tracing::warn!("completion backend rate limited, retrying in {backoff}ms");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                continue;
            }

            return Err(match status.as_u16() {
                401 => PolicyError::Backend("invalid API key".to_string()),
                code => PolicyError::Backend(format!(
                    "completion backend error {code}: {}",
                    crate::util::truncate(&text, 200)
                )),
            });
        }
    }

    fn classify(&self, err: reqwest::Error) -> PolicyError {
        if err.is_timeout() {
            PolicyError::Timeout {
                phase: PolicyPhase::Completing,
                seconds: self.timeout.as_secs(),
            }
        } else {
            PolicyError::Backend(err.to_string())
        }
    }
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, prompt: &Prompt) -> Result<String, PolicyError> {
        self.runtime.block_on(self.request(prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_both_messages() {
        let request = ChatRequest {
            model: "test/model",
            messages: vec![
                Message { role: "system", content: "you are a triage assistant" },
                Message { role: "user", content: "crash report follows" },
            ],
            max_tokens: 128,
            stream: false,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("triage assistant"));
        assert!(json.contains(r#""role":"user""#));
        assert!(json.contains(r#""stream":false"#));
    }

    #[test]
    fn response_content_is_optional() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
