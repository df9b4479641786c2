//! Nutgraf: article intake, content extraction and LLM summarization with a
//! metered JSON API.
//!
//! The pipeline runs URL validation and probing, article extraction, prompt
//! construction and provider dispatch, with a two-pass reduction for content
//! too long for a single request. The gateway in [`api`] exposes it to
//! API-key holders with per-account quotas.

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod extractor;
pub mod prompt;
pub mod providers;
pub mod store;
pub mod summarizer;
pub mod validator;

pub use error::NutgrafError;

/// User agent sent on every outbound HTTP request.
pub const USER_AGENT: &str = concat!("nutgraf/", env!("CARGO_PKG_VERSION"));
