//! LLM provider abstraction: chat types, an OpenAI-compatible HTTP
//! provider, and prefix-based routing of model ids to providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by providers. Retryability drives the gateway's
/// retry loop: auth and invalid-request failures fail fast.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no provider for model '{0}'")]
    NoProvider(String),
}

impl ProviderError {
    /// Transient failures are worth retrying; the rest are not
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Unavailable(_) | Self::Network(_) | Self::Timeout(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub latency_ms: i64,
}

/// A backend able to complete chat requests
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short identifier used in logs and routing
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// ---- OpenAI-compatible wire format ----

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

/// Provider speaking the OpenAI chat-completions wire format. Most
/// hosted inference endpoints accept this shape.
pub struct HttpProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> ProviderError {
        match status.as_u16() {
            401 | 403 => ProviderError::Auth(body),
            429 => ProviderError::RateLimited(body),
            400 | 404 | 422 => ProviderError::InvalidRequest(body),
            500..=599 => ProviderError::Unavailable(body),
            _ => ProviderError::Network(format!("unexpected status {status}: {body}")),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let started = std::time::Instant::now();

        // The model id reaching the wire has the routing prefix stripped
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(started.elapsed())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let latency_ms = started.elapsed().as_millis() as i64;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let content = wire
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::MalformedResponse("response had no choices".to_string()))?;

        debug!(provider = %self.name, latency_ms, "chat completion ok");

        Ok(ChatResponse {
            content,
            model: wire.model.unwrap_or_else(|| request.model.clone()),
            latency_ms,
        })
    }
}

/// Routes model ids of the form `prefix/model` to a registered
/// provider. Longest matching prefix wins; an optional default catches
/// unprefixed ids.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default: Option<Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default: None,
        }
    }

    pub fn register(&mut self, prefix: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(prefix.into(), provider);
    }

    pub fn set_default(&mut self, provider: Arc<dyn Provider>) {
        self.default = Some(provider);
    }

    /// Resolve a model id to (provider, model id with prefix stripped)
    pub fn resolve(&self, model_id: &str) -> Result<(Arc<dyn Provider>, String), ProviderError> {
        let mut prefixes: Vec<&String> = self.providers.keys().collect();
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));

        for prefix in prefixes {
            let with_slash = format!("{prefix}/");
            if let Some(rest) = model_id.strip_prefix(&with_slash) {
                if let Some(provider) = self.providers.get(prefix) {
                    return Ok((Arc::clone(provider), rest.to_string()));
                }
            }
        }

        if let Some(default) = &self.default {
            return Ok((Arc::clone(default), model_id.to_string()));
        }

        Err(ProviderError::NoProvider(model_id.to_string()))
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scripted providers for tests and local dry runs
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted provider for tests: fails the first `fail_count` calls
    /// with a retryable error, then returns the canned response.
    pub struct MockProvider {
        pub response: String,
        pub fail_count: AtomicU32,
        pub calls: AtomicU32,
    }

    impl MockProvider {
        pub fn ok(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                fail_count: AtomicU32::new(0),
                calls: AtomicU32::new(0),
            }
        }

        pub fn failing_first(fail_count: u32, response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                fail_count: AtomicU32::new(fail_count),
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.store(remaining - 1, Ordering::SeqCst);
                return Err(ProviderError::Unavailable("scripted failure".to_string()));
            }
            Ok(ChatResponse {
                content: self.response.clone(),
                model: request.model.clone(),
                latency_ms: 1,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockProvider;
    use super::*;

    #[test]
    fn test_router_prefers_longest_prefix() {
        let mut router = ProviderRouter::new();
        router.register("openai", Arc::new(MockProvider::ok("a")));
        router.register("openai/special", Arc::new(MockProvider::ok("b")));

        let (_, model) = router.resolve("openai/special/gpt-x").unwrap();
        assert_eq!(model, "gpt-x");

        let (_, model) = router.resolve("openai/gpt-4o-mini").unwrap();
        assert_eq!(model, "gpt-4o-mini");
    }

    #[test]
    fn test_router_default_catches_unprefixed() {
        let mut router = ProviderRouter::new();
        router.set_default(Arc::new(MockProvider::ok("a")));
        let (_, model) = router.resolve("plain-model").unwrap();
        assert_eq!(model, "plain-model");
    }

    #[test]
    fn test_router_unknown_model_errors() {
        let router = ProviderRouter::new();
        assert!(matches!(
            router.resolve("nope/model"),
            Err(ProviderError::NoProvider(_))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::RateLimited("x".into()).is_retryable());
        assert!(ProviderError::Unavailable("x".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ProviderError::Auth("x".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("x".into()).is_retryable());
    }
}
