//! Gateway in front of the provider router: retry with exponential
//! backoff, a per-provider circuit breaker, and JSON response repair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::llm::{ChatRequest, ChatResponse, Provider, ProviderError, ProviderRouter};
use crate::metrics;

/// Retry schedule for transient provider failures. Delays double per
/// attempt starting from `base_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { until_elapsed: bool },
}

struct Breaker {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker per provider name. Opens after a run of consecutive
/// failures; while open, calls fail fast; after the recovery window one
/// trial call is let through.
struct CircuitBreaker {
    failure_threshold: u32,
    recovery: Duration,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, recovery: Duration) -> Self {
        Self {
            failure_threshold,
            recovery,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, provider: &str) -> BreakerState {
        let mut breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let breaker = breakers.entry(provider.to_string()).or_insert(Breaker {
            consecutive_failures: 0,
            opened_at: None,
        });

        match breaker.opened_at {
            Some(opened) if opened.elapsed() < self.recovery => BreakerState::Open {
                until_elapsed: false,
            },
            Some(_) => {
                // Half-open: allow one trial call through
                BreakerState::Open { until_elapsed: true }
            }
            None => BreakerState::Closed,
        }
    }

    fn record_success(&self, provider: &str) {
        let mut breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(breaker) = breakers.get_mut(provider) {
            breaker.consecutive_failures = 0;
            breaker.opened_at = None;
        }
    }

    fn record_failure(&self, provider: &str) {
        let mut breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let breaker = breakers.entry(provider.to_string()).or_insert(Breaker {
            consecutive_failures: 0,
            opened_at: None,
        });
        breaker.consecutive_failures += 1;
        if breaker.consecutive_failures >= self.failure_threshold {
            if breaker.opened_at.is_none() {
                warn!(provider, failures = breaker.consecutive_failures, "circuit breaker opened");
            }
            breaker.opened_at = Some(Instant::now());
        }
    }
}

/// Single entry point for all model calls in the pipeline
pub struct LlmGateway {
    router: ProviderRouter,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl LlmGateway {
    pub fn new(router: ProviderRouter, retry: RetryPolicy, failure_threshold: u32, recovery: Duration) -> Self {
        Self {
            router,
            retry,
            breaker: CircuitBreaker::new(failure_threshold, recovery),
        }
    }

    /// Complete a chat request, retrying transient failures with
    /// exponential backoff and honoring the circuit breaker.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let (provider, model) = self.router.resolve(&request.model)?;
        let name = provider.name().to_string();

        match self.breaker.check(&name) {
            BreakerState::Open { until_elapsed: false } => {
                metrics::record_llm_breaker_rejection(&name);
                return Err(ProviderError::Unavailable(format!(
                    "circuit breaker open for provider '{name}'"
                )));
            }
            BreakerState::Open { until_elapsed: true } => {
                debug!(provider = %name, "circuit breaker half-open, trial call");
            }
            BreakerState::Closed => {}
        }

        let mut wire_request = request.clone();
        wire_request.model = model;

        let mut last_error = ProviderError::Unavailable("no attempt made".to_string());
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt - 1);
                debug!(provider = %name, attempt, ?delay, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }

            match self.call(&provider, &wire_request).await {
                Ok(response) => {
                    self.breaker.record_success(&name);
                    metrics::record_llm_call(&name, true, response.latency_ms as f64);
                    return Ok(response);
                }
                Err(err) => {
                    self.breaker.record_failure(&name);
                    metrics::record_llm_call(&name, false, 0.0);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    async fn call(
        &self,
        provider: &Arc<dyn Provider>,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        provider.complete(request).await
    }

    /// Complete a request whose answer must be a JSON document, and
    /// parse it. Models wrap JSON in prose or code fences often enough
    /// that extraction is attempted before giving up.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        request: &ChatRequest,
    ) -> Result<(T, ChatResponse), ProviderError> {
        let response = self.complete(request).await?;
        let parsed = parse_json_response(&response.content).ok_or_else(|| {
            ProviderError::MalformedResponse(format!(
                "could not extract JSON from response: {}",
                truncate_for_log(&response.content)
            ))
        })?;
        Ok((parsed, response))
    }
}

/// Parse a model response as JSON: directly, then out of a code fence,
/// then the first balanced {...} block found in surrounding prose.
pub fn parse_json_response<T: DeserializeOwned>(content: &str) -> Option<T> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced.trim()) {
            return Some(value);
        }
    }

    if let Some(embedded) = extract_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str(embedded) {
            return Some(value);
        }
    }

    None
}

fn extract_fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    // Skip a language tag like `json` on the fence line
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn extract_balanced_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_for_log(content: &str) -> String {
    const MAX: usize = 200;
    if content.len() <= MAX {
        content.to_string()
    } else {
        let mut end = MAX;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &content[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockProvider;
    use crate::llm::ChatMessage;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        label: String,
        confidence: f64,
    }

    fn gateway_with(provider: MockProvider) -> (LlmGateway, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let mut router = ProviderRouter::new();
        router.register("mock", Arc::clone(&provider) as Arc<dyn Provider>);
        let retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        (
            LlmGateway::new(router, retry, 5, Duration::from_secs(60)),
            provider,
        )
    }

    fn request() -> ChatRequest {
        ChatRequest::new("mock/test-model", vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let (gateway, provider) = gateway_with(MockProvider::failing_first(2, "answer"));
        let response = gateway.complete(&request()).await.unwrap();
        assert_eq!(response.content, "answer");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (gateway, provider) = gateway_with(MockProvider::failing_first(10, "answer"));
        assert!(gateway.complete(&request()).await.is_err());
        // initial attempt + 3 retries
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let (gateway, provider) = gateway_with(MockProvider::failing_first(100, "x"));
        // Two failing requests: 4 attempts each pushes past the threshold of 5
        let _ = gateway.complete(&request()).await;
        let _ = gateway.complete(&request()).await;
        let calls_before = provider.call_count();

        // Breaker is now open: no call reaches the provider
        let err = gateway.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert_eq!(provider.call_count(), calls_before);
    }

    #[tokio::test]
    async fn test_json_parsing_direct_and_fenced() {
        let (gateway, _) =
            gateway_with(MockProvider::ok(r#"{"label": "relevant", "confidence": 0.9}"#));
        let (verdict, _): (Verdict, _) = gateway.complete_json(&request()).await.unwrap();
        assert_eq!(verdict.label, "relevant");

        let fenced = "Here you go:\n```json\n{\"label\": \"maybe\", \"confidence\": 0.4}\n```\nDone.";
        let (gateway, _) = gateway_with(MockProvider::ok(fenced));
        let (verdict, _): (Verdict, _) = gateway.complete_json(&request()).await.unwrap();
        assert_eq!(verdict.label, "maybe");
    }

    #[test]
    fn test_extract_embedded_object() {
        let prose = r#"The post looks relevant. {"label": "relevant", "confidence": 0.75} Hope that helps!"#;
        let verdict: Verdict = parse_json_response(prose).unwrap();
        assert_eq!(verdict.confidence, 0.75);
    }

    #[test]
    fn test_parse_failure_returns_none() {
        assert!(parse_json_response::<Verdict>("I cannot answer that.").is_none());
        assert!(parse_json_response::<Verdict>("{broken json").is_none());
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        struct AuthFail;
        #[async_trait::async_trait]
        impl Provider for AuthFail {
            fn name(&self) -> &str {
                "authfail"
            }
            async fn complete(&self, _: &ChatRequest) -> Result<ChatResponse, ProviderError> {
                Err(ProviderError::Auth("bad key".to_string()))
            }
        }

        let mut router = ProviderRouter::new();
        router.register("authfail", Arc::new(AuthFail));
        let gateway = LlmGateway::new(
            router,
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
            },
            5,
            Duration::from_secs(60),
        );
        let err = gateway
            .complete(&ChatRequest::new("authfail/m", vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }
}
