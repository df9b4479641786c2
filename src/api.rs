//! External API gateway.
//!
//! Authenticates callers by opaque API token, enforces the monthly call
//! quota before any pipeline work starts, and exposes the summarization
//! pipeline plus usage telemetry over JSON.

use crate::config::AppConfig;
use crate::error::NutgrafError;
use crate::extractor::{ArticleExtractor, ArticleSource};
use crate::prompt::{SummaryFormat, SummaryLength, SummarySettings, SummaryTone};
use crate::providers::{
    ProviderCredentials, ProviderRegistry, ANTHROPIC_KEY_PREFIX, OPENAI_KEY_PREFIX,
};
use crate::store::{NewSummary, Store, UsageQuota, UserRecord};
use crate::summarizer::{Summarizer, SummaryInput};
use chrono::Utc;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Shared server state managed by Rocket.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: AppConfig,
    summarizer: Summarizer,
    /// When set, every request uses this registry instead of building one
    /// from credentials. Test hook only.
    provider_overrides: Option<ProviderRegistry>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: AppConfig) -> Self {
        Self {
            store,
            config,
            summarizer: Summarizer::new(Arc::new(ArticleExtractor::new())),
            provider_overrides: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ArticleSource>) -> Self {
        self.summarizer = Summarizer::new(source);
        self
    }

    pub fn with_provider_overrides(mut self, registry: ProviderRegistry) -> Self {
        self.provider_overrides = Some(registry);
        self
    }
}

// ---------------------------------------------------------------------------
// Error bodies

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageQuota>,
    /// Present only when a summary was generated but could not be saved; the
    /// text is never discarded just because persistence failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

impl ErrorBody {
    fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            usage: None,
            summary: None,
        }
    }
}

/// Guard failures stash their body here so the status catcher can emit it.
#[derive(Default, Clone)]
struct GuardFailure(Option<ErrorBody>);

/// Handler-level error: a pipeline failure rendered as `{error, message}`
/// with the status its taxonomy entry maps to.
pub struct ApiError {
    error: NutgrafError,
    unsaved_summary: Option<serde_json::Value>,
}

impl From<NutgrafError> for ApiError {
    fn from(error: NutgrafError) -> Self {
        Self {
            error,
            unsaved_summary: None,
        }
    }
}

impl ApiError {
    /// Attach a generated-but-unsaved summary so a persistence failure still
    /// hands the caller their text.
    fn with_unsaved_summary(mut self, text: &str, word_count: usize) -> Self {
        self.unsaved_summary = Some(json!({
            "text": text,
            "word_count": word_count,
            "id": serde_json::Value::Null,
        }));
        self
    }

    fn status(&self) -> Status {
        match self.error {
            NutgrafError::UrlParseError(_)
            | NutgrafError::ValidationError(_)
            | NutgrafError::ExtractionFailure(_)
            | NutgrafError::ConfigurationError(_) => Status::BadRequest,
            NutgrafError::AuthenticationError(_) => Status::Unauthorized,
            NutgrafError::QuotaExceeded | NutgrafError::RateLimitError(_) => {
                Status::TooManyRequests
            }
            NutgrafError::ProviderError { .. }
            | NutgrafError::EmptyResponseError(_)
            | NutgrafError::PersistenceError(_) => Status::InternalServerError,
        }
    }

    fn body(&self) -> ErrorBody {
        let mut body = match &self.error {
            // Missing-credential errors put the actionable text in `error`
            // itself, matching what API clients key on.
            NutgrafError::ConfigurationError(msg) => ErrorBody::new(
                msg,
                "Provide the key in the request or store one in your account settings.",
            ),
            e => ErrorBody::new(e.code(), &e.to_string()),
        };
        body.summary = self.unsaved_summary.clone();
        body
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'static> {
        self.error.log();
        let status = self.status();
        let body = self.body();
        rocket::response::status::Custom(status, Json(body)).respond_to(request)
    }
}

// ---------------------------------------------------------------------------
// Authentication guard

/// The authenticated caller. Construction performs the fail-fast checks:
/// token lookup, active flag, and quota — a caller at its limit is rejected
/// before any extraction or dispatch work begins.
pub struct ApiKeyPrincipal(pub UserRecord);

fn bearer_token<'r>(request: &'r Request<'_>) -> Option<&'r str> {
    // Authorization wins over X-API-Key when both are present.
    if let Some(value) = request.headers().get_one("Authorization") {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim());
        }
    }
    request.headers().get_one("X-API-Key").map(str::trim)
}

fn guard_reject(request: &Request<'_>, status: Status, body: ErrorBody) -> Outcome<ApiKeyPrincipal, ()> {
    request.local_cache(|| GuardFailure(Some(body)));
    Outcome::Error((status, ()))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ApiKeyPrincipal {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let state = match request.rocket().state::<AppState>() {
            Some(state) => state,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };

        let token = match bearer_token(request) {
            Some(token) if !token.is_empty() => token,
            _ => {
                return guard_reject(
                    request,
                    Status::Unauthorized,
                    ErrorBody::new(
                        "api_key_required",
                        "Provide an API key via 'Authorization: Bearer <key>' or 'X-API-Key'.",
                    ),
                );
            }
        };

        // Cheap shape check before touching storage.
        if !crate::crypto::is_api_token_shape(token) {
            return guard_reject(
                request,
                Status::Unauthorized,
                ErrorBody::new("invalid_api_key", "Invalid API key."),
            );
        }

        let user = match state.store.find_principal_by_token(token).await {
            Some(user) => user,
            None => {
                warn!("request with unknown API key");
                return guard_reject(
                    request,
                    Status::Unauthorized,
                    ErrorBody::new("invalid_api_key", "Invalid API key."),
                );
            }
        };

        if !user.is_active {
            return guard_reject(
                request,
                Status::Forbidden,
                ErrorBody::new("account_inactive", "This account has been deactivated."),
            );
        }

        let quota = UsageQuota::from_counts(user.calls_made, user.calls_limit);
        if quota.exhausted() {
            let mut body =
                ErrorBody::new("quota_exceeded", "Monthly API call limit exceeded.");
            body.usage = Some(quota);
            return guard_reject(request, Status::TooManyRequests, body);
        }

        Outcome::Success(ApiKeyPrincipal(user))
    }
}

// ---------------------------------------------------------------------------
// Routes

#[get("/v1/health")]
fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "Nutgraf API",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub url: Option<String>,
    pub text: Option<String>,
    pub title: Option<String>,
    pub length: Option<String>,
    pub tone: Option<String>,
    pub format: Option<String>,
    pub model: Option<String>,
    pub custom_word_count: Option<u32>,
    pub save_summary: Option<bool>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Resolve request settings, falling back to the caller's stored defaults.
fn resolve_settings(request: &SummarizeRequest, user: &UserRecord) -> SummarySettings {
    SummarySettings {
        length: non_empty(&request.length)
            .map(SummaryLength::parse_lenient)
            .unwrap_or(user.default_length),
        tone: non_empty(&request.tone)
            .map(SummaryTone::parse_lenient)
            .unwrap_or(user.default_tone),
        format: non_empty(&request.format)
            .map(SummaryFormat::parse_lenient)
            .unwrap_or(user.default_format),
        model: non_empty(&request.model)
            .unwrap_or(&user.default_model)
            .to_string(),
        custom_word_count: request.custom_word_count,
    }
}

/// Build the per-request registry: inline overrides beat stored credentials.
/// A stored credential that fails to decrypt is treated as absent.
fn build_registry(
    state: &AppState,
    user: &UserRecord,
    inline_openai: Option<&str>,
    inline_anthropic: Option<&str>,
) -> ProviderRegistry {
    if let Some(registry) = &state.provider_overrides {
        return registry.clone();
    }

    let decrypt_stored = |sealed: &Option<String>| {
        sealed.as_ref().and_then(|sealed| {
            match state.config.encryption_key.decrypt(sealed) {
                Ok(plain) => Some(plain),
                Err(e) => {
                    warn!(user_id = user.id, error = %e, "stored credential could not be decrypted");
                    None
                }
            }
        })
    };

    let credentials = ProviderCredentials {
        openai_key: inline_openai
            .map(str::to_string)
            .or_else(|| decrypt_stored(&user.encrypted_openai_key)),
        anthropic_key: inline_anthropic
            .map(str::to_string)
            .or_else(|| decrypt_stored(&user.encrypted_anthropic_key)),
    };

    ProviderRegistry::from_credentials(&credentials)
}

#[post("/v1/summarize", data = "<body>")]
async fn summarize(
    principal: ApiKeyPrincipal,
    state: &State<AppState>,
    body: Json<SummarizeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = principal.0;
    let request = body.into_inner();

    let url = non_empty(&request.url);
    let text = non_empty(&request.text);
    let input = match (url, text) {
        (Some(url), None) => SummaryInput::Url(url.to_string()),
        (None, Some(text)) => SummaryInput::Text {
            content: text.to_string(),
            title: non_empty(&request.title).map(str::to_string),
        },
        (Some(_), Some(_)) => {
            return Err(NutgrafError::ValidationError(
                "Provide either 'url' or 'text', not both".to_string(),
            )
            .into());
        }
        (None, None) => {
            return Err(NutgrafError::ValidationError(
                "Either 'url' or 'text' is required".to_string(),
            )
            .into());
        }
    };

    if let Some(key) = non_empty(&request.openai_api_key) {
        if !key.starts_with(OPENAI_KEY_PREFIX) {
            return Err(NutgrafError::ValidationError(
                "Invalid OpenAI API key format".to_string(),
            )
            .into());
        }
    }
    if let Some(key) = non_empty(&request.anthropic_api_key) {
        if !key.starts_with(ANTHROPIC_KEY_PREFIX) {
            return Err(NutgrafError::ValidationError(
                "Invalid Anthropic API key format".to_string(),
            )
            .into());
        }
    }

    let settings = resolve_settings(&request, &user);
    let registry = build_registry(
        state,
        &user,
        non_empty(&request.openai_api_key),
        non_empty(&request.anthropic_api_key),
    );
    // Missing credential for the requested model is a 400 before any
    // extraction or network work.
    registry.provider_for(&settings.model)?;

    let outcome = state
        .summarizer
        .generate(&registry, input, &settings)
        .await?;

    // Summaries are stored only on request.
    let save = request.save_summary.unwrap_or(false);
    let new_summary = save.then(|| NewSummary {
        title: outcome.article.title.clone(),
        url: (!outcome.article.manual_input).then(|| outcome.article.url.clone()),
        original_text: outcome.article.content.clone(),
        summary_text: outcome.result.text.clone(),
        word_count: outcome.result.word_count,
        length: settings.length,
        tone: settings.tone,
        format: settings.format,
        model: settings.model.clone(),
    });

    // A failed save rolls the usage increment back but must not discard the
    // generated text: it rides along in the error body.
    let (quota, summary_id) = match state.store.commit_usage(user.id, new_summary).await {
        Ok(committed) => committed,
        Err(e @ NutgrafError::PersistenceError(_)) => {
            return Err(ApiError::from(e)
                .with_unsaved_summary(&outcome.result.text, outcome.result.word_count));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(json!({
        "summary": {
            "text": outcome.result.text,
            "word_count": outcome.result.word_count,
            "id": summary_id,
        },
        "metadata": {
            "title": outcome.article.title,
            "author": outcome.article.author,
            "url": (!outcome.article.manual_input).then_some(outcome.article.url),
            "length": settings.length.as_str(),
            "tone": settings.tone.as_str(),
            "format": settings.format.as_str(),
            "model": settings.model,
            "timestamp": Utc::now().to_rfc3339(),
        },
        "usage": {
            "calls_made": quota.calls_made,
            "calls_remaining": quota.calls_remaining,
        },
    })))
}

#[get("/v1/usage")]
fn usage(principal: ApiKeyPrincipal) -> Json<serde_json::Value> {
    let user = principal.0;
    let quota = UsageQuota::from_counts(user.calls_made, user.calls_limit);
    Json(json!({
        "usage": quota,
        "account": {
            "email": user.email,
            "member_since": user.created_at.to_rfc3339(),
        },
    }))
}

#[get("/v1/models")]
fn models(principal: ApiKeyPrincipal, state: &State<AppState>) -> Json<serde_json::Value> {
    let user = principal.0;
    let registry = build_registry(state, &user, None, None);
    Json(json!({
        "models": registry.available_models(),
        "default_model": user.default_model,
    }))
}

// ---------------------------------------------------------------------------
// Catchers

fn cached_body(request: &Request<'_>, fallback: ErrorBody) -> Json<ErrorBody> {
    let GuardFailure(stored) = request.local_cache(GuardFailure::default);
    Json(stored.clone().unwrap_or(fallback))
}

#[catch(401)]
fn unauthorized(request: &Request<'_>) -> Json<ErrorBody> {
    cached_body(request, ErrorBody::new("invalid_api_key", "Invalid API key."))
}

#[catch(403)]
fn forbidden(request: &Request<'_>) -> Json<ErrorBody> {
    cached_body(
        request,
        ErrorBody::new("account_inactive", "This account has been deactivated."),
    )
}

#[catch(429)]
fn too_many_requests(request: &Request<'_>) -> Json<ErrorBody> {
    cached_body(
        request,
        ErrorBody::new("quota_exceeded", "Monthly API call limit exceeded."),
    )
}

#[catch(404)]
fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody::new("not_found", "The requested endpoint does not exist."))
}

#[catch(405)]
fn method_not_allowed() -> Json<ErrorBody> {
    Json(ErrorBody::new(
        "method_not_allowed",
        "This endpoint does not support that HTTP method.",
    ))
}

#[catch(422)]
fn unprocessable() -> Json<ErrorBody> {
    Json(ErrorBody::new(
        "invalid_request",
        "Request body is not valid JSON for this endpoint.",
    ))
}

#[catch(500)]
fn internal_error() -> Json<ErrorBody> {
    Json(ErrorBody::new("internal_error", "An internal error occurred."))
}

/// Assemble the Rocket instance. Address and port are configured by the
/// binary; tests drive this directly with a local client.
pub fn rocket(state: AppState) -> Rocket<Build> {
    rocket::build()
        .manage(state)
        .mount("/", routes![health, summarize, usage, models])
        .register(
            "/",
            catchers![
                unauthorized,
                forbidden,
                too_many_requests,
                not_found,
                method_not_allowed,
                unprocessable,
                internal_error
            ],
        )
}
