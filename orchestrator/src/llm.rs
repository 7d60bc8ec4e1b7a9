//! Text-completion client shared by refinement, answer synthesis, rule
//! drafting and compliance auditing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::GenerationError;

/// One completion request: a system instruction, the grounding material and
/// the user's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub system_instruction: String,
    pub context_or_instructions: String,
    pub user_text: String,
}

impl CompletionRequest {
    /// Prompt body sent as the user turn.
    pub fn prompt(&self) -> String {
        if self.context_or_instructions.trim().is_empty() {
            self.user_text.clone()
        } else {
            format!("{}\n\n{}", self.context_or_instructions, self.user_text)
        }
    }
}

/// A single attempt against a completion endpoint.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base × 1.5^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1.5f64.powi(retry.min(16) as i32);
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * factor)
    }
}

/// Stateless generation wrapper with retry and exponential backoff.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Returns the first non-empty completion, or `GenerationError::Exhausted`
    /// once `1 + max_retries` attempts have failed.
    #[instrument(skip_all, fields(user_len = user_text.len(), context_len = context.len()))]
    pub async fn generate(
        &self,
        system_instruction: &str,
        context: &str,
        user_text: &str,
    ) -> Result<String, GenerationError> {
        let request = CompletionRequest {
            system_instruction: system_instruction.to_string(),
            context_or_instructions: context.to_string(),
            user_text: user_text.to_string(),
        };
        let attempts = self.policy.max_retries + 1;
        let mut last = GenerationError::EmptyResponse;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt as u32 - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying generation");
                tokio::time::sleep(delay).await;
            }

            match self.backend.complete(&request).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => {
                    warn!(attempt, "generation returned empty text");
                    last = GenerationError::EmptyResponse;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "generation attempt failed");
                    last = err;
                }
            }
        }

        Err(GenerationError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

/// Gemini `generateContent` backend.
pub struct GeminiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    sampling: SamplingConfig,
}

impl GeminiBackend {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "LLM endpoint must be an http(s) URL"
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build generation HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            sampling: SamplingConfig::default(),
        })
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let body = GeminiRequest::from_completion(request, &self.sampling);
        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.query(&[("key", key.trim())]);
        }

        let resp = call
            .send()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = resp
            .json()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        parsed.into_text()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

impl GeminiRequest {
    fn from_completion(request: &CompletionRequest, sampling: &SamplingConfig) -> Self {
        let system_instruction = if request.system_instruction.trim().is_empty() {
            None
        } else {
            Some(GeminiContent::text(None, &request.system_instruction))
        };
        Self {
            contents: vec![GeminiContent::text(Some("user"), &request.prompt())],
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

impl GeminiResponse {
    /// Text of the first candidate; its parts are concatenated.
    fn into_text(self) -> Result<String, GenerationError> {
        let text = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            Err(GenerationError::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailNThenSucceed {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for FailNThenSucceed {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(GenerationError::Transport("connection reset".into()))
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    struct AlwaysEmpty {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for AlwaysEmpty {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("   ".to_string())
        }
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn fails_twice_then_succeeds_on_third_call() {
        let backend = Arc::new(FailNThenSucceed {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let client = GenerationClient::new(backend.clone(), no_wait());
        let text = client.generate("sys", "ctx", "question").await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn always_failing_backend_is_exhausted_after_three_attempts() {
        let backend = Arc::new(FailNThenSucceed {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let client = GenerationClient::new(backend.clone(), no_wait());
        let err = client.generate("sys", "ctx", "question").await.unwrap_err();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        match err {
            GenerationError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, GenerationError::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_text_counts_as_a_failure() {
        let backend = Arc::new(AlwaysEmpty {
            calls: AtomicUsize::new(0),
        });
        let client = GenerationClient::new(backend.clone(), no_wait());
        let err = client.generate("sys", "", "q").await.unwrap_err();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            GenerationError::Exhausted { last, .. } if *last == GenerationError::EmptyResponse
        ));
    }

    #[test]
    fn backoff_grows_by_one_and_a_half() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
    }

    #[test]
    fn prompt_joins_context_and_user_text() {
        let request = CompletionRequest {
            system_instruction: "sys".into(),
            context_or_instructions: "CONTEXT:\n[Page 1]: x".into(),
            user_text: "USER QUESTION: y".into(),
        };
        assert_eq!(request.prompt(), "CONTEXT:\n[Page 1]: x\n\nUSER QUESTION: y");

        let bare = CompletionRequest {
            context_or_instructions: "  ".into(),
            ..request
        };
        assert_eq!(bare.prompt(), "USER QUESTION: y");
    }

    #[test]
    fn gemini_request_shape() {
        let request = CompletionRequest {
            system_instruction: "be precise".into(),
            context_or_instructions: "CONTEXT".into(),
            user_text: "Q".into(),
        };
        let body = serde_json::to_value(GeminiRequest::from_completion(
            &request,
            &SamplingConfig::default(),
        ))
        .unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "CONTEXT\n\nQ");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be precise");
        assert_eq!(body["generationConfig"]["topK"], 40);
    }

    #[test]
    fn gemini_response_takes_first_candidate() {
        let parsed: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": "Thirty days "}, {"text": "[Page 4]."}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.into_text().unwrap(), "Thirty days [Page 4].");

        let empty: GeminiResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty.into_text().unwrap_err(), GenerationError::EmptyResponse);
    }
}
