//! LLM provider clients and the model-routing registry.
//!
//! Providers share one capability: turn a prompt into generated text.
//! Routing is by model-name prefix (`gpt*` to OpenAI, `claude*` to
//! Anthropic); everything provider-specific, including transient retries and
//! error shapes, stays behind the trait.

use crate::error::NutgrafError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);
/// Transient failures are retried this many times beyond the first attempt.
const MAX_RETRIES: usize = 2;
const MAX_COMPLETION_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.3;

pub const OPENAI_KEY_PREFIX: &str = "sk-";
pub const ANTHROPIC_KEY_PREFIX: &str = "sk-ant-";

const SYSTEM_PROMPT: &str = "You are a professional article summarizer who creates \
accurate, paraphrased summaries without using direct quotes.";

/// Capability shared by every LLM backend.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, NutgrafError>;
}

/// Provider family a model identifier routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    OpenAi,
    Anthropic,
}

impl ModelFamily {
    pub fn for_model(model: &str) -> Result<Self, NutgrafError> {
        if model.starts_with("gpt") {
            Ok(ModelFamily::OpenAi)
        } else if model.starts_with("claude") {
            Ok(ModelFamily::Anthropic)
        } else {
            Err(NutgrafError::ValidationError(format!(
                "Unsupported model: {}",
                model
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
}

const OPENAI_MODELS: &[ModelInfo] = &[
    ModelInfo { id: "gpt-3.5-turbo", name: "GPT-3.5 Turbo", provider: "OpenAI" },
    ModelInfo { id: "gpt-4", name: "GPT-4", provider: "OpenAI" },
    ModelInfo { id: "gpt-4o", name: "GPT-4o", provider: "OpenAI" },
    ModelInfo { id: "gpt-4-turbo", name: "GPT-4 Turbo", provider: "OpenAI" },
];

const ANTHROPIC_MODELS: &[ModelInfo] = &[
    ModelInfo { id: "claude-3-haiku", name: "Claude 3 Haiku", provider: "Anthropic" },
    ModelInfo { id: "claude-3-sonnet", name: "Claude 3.5 Sonnet", provider: "Anthropic" },
    ModelInfo { id: "claude-3-opus", name: "Claude 3 Opus", provider: "Anthropic" },
];

/// Map an internal short name to the provider-specific identifier. Unknown
/// names fall back to the default Sonnet build.
pub fn resolve_anthropic_model(model: &str) -> &'static str {
    match model {
        "claude-3-sonnet" => "claude-3-5-sonnet-20241022",
        "claude-3-haiku" => "claude-3-haiku-20240307",
        "claude-3-opus" => "claude-3-opus-20240229",
        _ => "claude-3-5-sonnet-20241022",
    }
}

fn provider_client() -> Client {
    Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .user_agent(crate::USER_AGENT)
        .build()
        .unwrap_or_else(|e| panic!("Failed to initialize provider HTTP client: {}", e))
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(1000 << attempt)
}

// ---------------------------------------------------------------------------
// OpenAI

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: provider_client(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl SummaryProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, NutgrafError> {
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt - 1)).await;
                debug!(attempt, model, "retrying OpenAI request");
            }

            let response = match self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, attempt, "OpenAI request failed to send");
                    last_error = Some(NutgrafError::ProviderError {
                        service: "OpenAI".to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(NutgrafError::AuthenticationError(
                    "Invalid OpenAI API key. Please check your API key in Settings.".to_string(),
                ));
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = Some(NutgrafError::RateLimitError(
                    "OpenAI rate limit exceeded. Please try again later.".to_string(),
                ));
                continue;
            }
            if status.is_server_error() {
                last_error = Some(NutgrafError::ProviderError {
                    service: "OpenAI".to_string(),
                    message: format!("OpenAI API returned status {}", status),
                });
                continue;
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(NutgrafError::ProviderError {
                    service: "OpenAI".to_string(),
                    message: format!("OpenAI API error {}: {}", status, detail),
                });
            }

            let parsed: ChatResponse = response.json().await.map_err(|e| {
                NutgrafError::ProviderError {
                    service: "OpenAI".to_string(),
                    message: format!("Failed to parse OpenAI response: {}", e),
                }
            })?;

            return parsed
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_deref())
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .ok_or_else(|| NutgrafError::EmptyResponseError("OpenAI".to_string()));
        }

        Err(last_error.unwrap_or_else(|| NutgrafError::ProviderError {
            service: "OpenAI".to_string(),
            message: "Max retries exceeded".to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Anthropic

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: provider_client(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl SummaryProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, NutgrafError> {
        let resolved_model = resolve_anthropic_model(model);
        let body = MessagesRequest {
            model: resolved_model,
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt - 1)).await;
                debug!(attempt, model = resolved_model, "retrying Anthropic request");
            }

            let response = match self
                .client
                .post("https://api.anthropic.com/v1/messages")
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, attempt, "Anthropic request failed to send");
                    last_error = Some(NutgrafError::ProviderError {
                        service: "Anthropic".to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(NutgrafError::AuthenticationError(
                    "Invalid Anthropic API key. Please check your API key in Settings."
                        .to_string(),
                ));
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = Some(NutgrafError::RateLimitError(
                    "Anthropic rate limit exceeded. Please try again later.".to_string(),
                ));
                continue;
            }
            if status.is_server_error() {
                last_error = Some(NutgrafError::ProviderError {
                    service: "Anthropic".to_string(),
                    message: format!("Anthropic API returned status {}", status),
                });
                continue;
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(NutgrafError::ProviderError {
                    service: "Anthropic".to_string(),
                    message: format!("Anthropic API error {}: {}", status, detail),
                });
            }

            let parsed: MessagesResponse = response.json().await.map_err(|e| {
                NutgrafError::ProviderError {
                    service: "Anthropic".to_string(),
                    message: format!("Failed to parse Anthropic response: {}", e),
                }
            })?;

            return parsed
                .content
                .first()
                .and_then(|block| block.text.as_deref())
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .ok_or_else(|| NutgrafError::EmptyResponseError("Anthropic".to_string()));
        }

        Err(last_error.unwrap_or_else(|| NutgrafError::ProviderError {
            service: "Anthropic".to_string(),
            message: "Max retries exceeded".to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Registry

/// Per-request provider credentials: inline overrides take precedence over
/// the caller's stored, decrypted credentials.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub openai_key: Option<String>,
    pub anthropic_key: Option<String>,
}

/// Routes generation requests to the provider a model belongs to. A family
/// without a credential has no client at all; requesting it is a
/// configuration error raised before any network call.
#[derive(Clone)]
pub struct ProviderRegistry {
    openai: Option<Arc<dyn SummaryProvider>>,
    anthropic: Option<Arc<dyn SummaryProvider>>,
}

impl ProviderRegistry {
    pub fn from_credentials(credentials: &ProviderCredentials) -> Self {
        let openai = credentials
            .openai_key
            .as_ref()
            .map(|key| Arc::new(OpenAiProvider::new(key.clone())) as Arc<dyn SummaryProvider>);
        let anthropic = credentials
            .anthropic_key
            .as_ref()
            .map(|key| Arc::new(AnthropicProvider::new(key.clone())) as Arc<dyn SummaryProvider>);
        Self { openai, anthropic }
    }

    /// Assemble a registry from explicit providers; used by tests to swap in
    /// mock backends.
    pub fn with_providers(
        openai: Option<Arc<dyn SummaryProvider>>,
        anthropic: Option<Arc<dyn SummaryProvider>>,
    ) -> Self {
        Self { openai, anthropic }
    }

    pub fn has_family(&self, family: ModelFamily) -> bool {
        match family {
            ModelFamily::OpenAi => self.openai.is_some(),
            ModelFamily::Anthropic => self.anthropic.is_some(),
        }
    }

    /// Resolve the provider for a model, surfacing missing credentials
    /// before dispatch.
    pub fn provider_for(&self, model: &str) -> Result<&Arc<dyn SummaryProvider>, NutgrafError> {
        match ModelFamily::for_model(model)? {
            ModelFamily::OpenAi => self.openai.as_ref().ok_or_else(|| {
                NutgrafError::ConfigurationError("OpenAI API key required".to_string())
            }),
            ModelFamily::Anthropic => self.anthropic.as_ref().ok_or_else(|| {
                NutgrafError::ConfigurationError("Anthropic API key required".to_string())
            }),
        }
    }

    pub async fn dispatch(&self, prompt: &str, model: &str) -> Result<String, NutgrafError> {
        let provider = self.provider_for(model)?;
        debug!(provider = provider.name(), model, "dispatching generation request");
        provider.generate(prompt, model).await
    }

    /// Model catalog filtered to families with a resolvable credential.
    pub fn available_models(&self) -> Vec<ModelInfo> {
        let mut models = Vec::new();
        if self.has_family(ModelFamily::OpenAi) {
            models.extend(OPENAI_MODELS.iter().cloned());
        }
        if self.has_family(ModelFamily::Anthropic) {
            models.extend(ANTHROPIC_MODELS.iter().cloned());
        }
        models
    }
}

// ---------------------------------------------------------------------------
// Mock

type MockResponse = Result<String, NutgrafError>;

/// Scriptable provider for tests: replays queued responses in order, then
/// falls back to a fixed summary. Counts every generate call.
pub struct MockProvider {
    name: String,
    responses: Mutex<Vec<MockResponse>>,
    calls: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.responses
            .lock()
            .expect("mock responses poisoned")
            .push(Ok(text.into()));
        self
    }

    pub fn with_failure(self, error: NutgrafError) -> Self {
        self.responses
            .lock()
            .expect("mock responses poisoned")
            .push(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str, _model: &str) -> Result<String, NutgrafError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().expect("mock responses poisoned");
        if responses.is_empty() {
            Ok("Mock summary text.".to_string())
        } else {
            responses.remove(0)
        }
    }
}
