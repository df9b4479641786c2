use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum NutgrafError {
    #[error("Failed to parse URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("{0}")]
    ValidationError(String),

    #[error("Failed to extract content: {0}")]
    ExtractionFailure(String),

    #[error("{0}")]
    ConfigurationError(String),

    #[error("{0}")]
    AuthenticationError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    #[error("Provider error: {service} - {message}")]
    ProviderError { service: String, message: String },

    #[error("Empty response from {0}")]
    EmptyResponseError(String),

    #[error("Monthly API call limit exceeded")]
    QuotaExceeded,

    #[error("Storage operation failed: {0}")]
    PersistenceError(String),
}

impl NutgrafError {
    /// Short machine-readable code used in gateway error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            NutgrafError::UrlParseError(_) => "invalid_url",
            NutgrafError::ValidationError(_) => "invalid_request",
            NutgrafError::ExtractionFailure(_) => "extraction_failed",
            NutgrafError::ConfigurationError(_) => "configuration_error",
            NutgrafError::AuthenticationError(_) => "authentication_error",
            NutgrafError::RateLimitError(_) => "rate_limited",
            NutgrafError::ProviderError { .. } => "provider_error",
            NutgrafError::EmptyResponseError(_) => "empty_response",
            NutgrafError::QuotaExceeded => "quota_exceeded",
            NutgrafError::PersistenceError(_) => "persistence_error",
        }
    }

    pub fn log(&self) {
        match self {
            NutgrafError::UrlParseError(e) => {
                warn!(error = %e, "URL parsing failed");
            }
            NutgrafError::ValidationError(e) => {
                warn!(error = %e, "request validation failed");
            }
            NutgrafError::ExtractionFailure(e) => {
                error!(error = %e, "content extraction failed");
            }
            NutgrafError::ConfigurationError(e) => {
                warn!(error = %e, "missing or invalid configuration");
            }
            NutgrafError::AuthenticationError(e) => {
                warn!(error = %e, "provider credential rejected");
            }
            NutgrafError::RateLimitError(e) => {
                warn!(error = %e, "provider rate limit hit");
            }
            NutgrafError::ProviderError { service, message } => {
                error!(service = %service, error = %message, "provider request failed");
            }
            NutgrafError::EmptyResponseError(service) => {
                error!(service = %service, "provider returned no usable text");
            }
            NutgrafError::QuotaExceeded => {
                warn!("principal quota exhausted");
            }
            NutgrafError::PersistenceError(e) => {
                error!(error = %e, "persistence operation failed");
            }
        }
    }
}
