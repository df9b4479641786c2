//! URL validation and lightweight reachability probing.
//!
//! Probing is advisory: a URL that cannot be verified is still handed to the
//! extractor with a warning instead of being rejected. Tightening this would
//! break intake of paywalled or bot-hostile sites that the extractor can
//! often still read.

use crate::error::NutgrafError;
use futures::StreamExt;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Probe timeout per URL.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
/// How much of a page body a fallback probe may read.
const PROBE_BODY_CAP: usize = 2048;
/// Default worker-pool width for batch probing.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Valid,
    Warning,
    Error,
}

/// Outcome of probing a single URL. `accessible` is a hint for the caller,
/// never a gate: extraction is attempted regardless.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub title: String,
    pub status: ProbeStatus,
    pub accessible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Clone)]
pub struct UrlValidator {
    client: Client,
    allowed_schemes: HashSet<String>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlValidator {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .user_agent(crate::USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|e| {
                panic!("Failed to initialize probe HTTP client: {}", e);
            });

        let mut allowed_schemes = HashSet::new();
        allowed_schemes.insert("http".to_string());
        allowed_schemes.insert("https".to_string());

        Self {
            client,
            allowed_schemes,
        }
    }

    /// A URL is valid iff it parses, its scheme is http(s), and it has a
    /// non-empty host.
    pub fn validate(&self, url_str: &str) -> Result<Url, NutgrafError> {
        let url = Url::parse(url_str)?;

        if !self.allowed_schemes.contains(url.scheme()) {
            return Err(NutgrafError::ValidationError(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(url),
            _ => Err(NutgrafError::ValidationError(
                "URL has no host".to_string(),
            )),
        }
    }

    pub fn is_valid(&self, url_str: &str) -> bool {
        self.validate(url_str).is_ok()
    }

    /// Split textarea-style input into the subset of lines that validate.
    pub fn parse_url_list(&self, text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && self.is_valid(line))
            .map(str::to_string)
            .collect()
    }

    /// Probe a URL for reachability and a display title.
    ///
    /// Tries a header-only request first, then a partial-body fetch capped at
    /// 2KB. Every failure degrades to a warning with a title derived from the
    /// URL path.
    pub async fn probe(&self, url_str: &str) -> ProbeResult {
        let url = match self.validate(url_str) {
            Ok(url) => url,
            Err(e) => {
                return ProbeResult {
                    url: url_str.to_string(),
                    title: title_from_url_lossy(url_str),
                    status: ProbeStatus::Error,
                    accessible: false,
                    warning: Some(e.to_string()),
                };
            }
        };

        debug!(url = %url, "probing URL");

        match self.client.head(url.clone()).send().await {
            Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                ProbeResult {
                    url: url_str.to_string(),
                    title: title_from_url(&url),
                    status: ProbeStatus::Valid,
                    accessible: true,
                    warning: None,
                }
            }
            Ok(_) | Err(_) => self.probe_partial_body(url_str, &url).await,
        }
    }

    /// Fallback probe: GET the page but read at most `PROBE_BODY_CAP` bytes,
    /// enough to sniff a `<title>`.
    async fn probe_partial_body(&self, url_str: &str, url: &Url) -> ProbeResult {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "probe failed, deferring to extractor");
                return ProbeResult {
                    url: url_str.to_string(),
                    title: title_from_url(url),
                    status: ProbeStatus::Warning,
                    accessible: true,
                    warning: Some(
                        "Could not verify URL accessibility, but will attempt extraction"
                            .to_string(),
                    ),
                };
            }
        };

        let status = response.status();
        // 403/404 pages frequently still carry extractable content.
        let accessible = status.is_success()
            || status.is_redirection()
            || status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::NOT_FOUND;

        let mut head = Vec::with_capacity(PROBE_BODY_CAP);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    head.extend_from_slice(&bytes);
                    if head.len() >= PROBE_BODY_CAP {
                        head.truncate(PROBE_BODY_CAP);
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        let sniffed = String::from_utf8_lossy(&head);
        let title = title_from_html(&sniffed).unwrap_or_else(|| title_from_url(url));

        ProbeResult {
            url: url_str.to_string(),
            title,
            status: ProbeStatus::Valid,
            accessible,
            warning: None,
        }
    }

    /// Probe many URLs through a worker pool bounded at
    /// [`DEFAULT_PROBE_CONCURRENCY`]. One URL's failure never affects the
    /// others; the result preserves input order and length.
    pub async fn probe_batch(&self, urls: &[String]) -> Vec<ProbeResult> {
        futures::stream::iter(urls.iter().map(|url| self.probe(url)))
            .buffered(DEFAULT_PROBE_CONCURRENCY)
            .collect()
            .await
    }
}

/// Derive a human-readable title from the URL path: last segment, extension
/// stripped, hyphens and underscores replaced, words capitalized. Falls back
/// to the host when the path is empty.
pub fn title_from_url(url: &Url) -> String {
    let path = url.path().trim_matches('/');

    let segment = path.rsplit('/').next().unwrap_or("");
    if segment.is_empty() {
        return url.host_str().unwrap_or_default().to_string();
    }

    let stem = match segment.rfind('.') {
        Some(idx) if segment[idx + 1..].chars().all(|c| c.is_ascii_alphanumeric()) => {
            &segment[..idx]
        }
        _ => segment,
    };

    stem.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Like [`title_from_url`], for strings that may not parse as URLs.
pub fn title_from_url_lossy(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(url) => title_from_url(&url),
        Err(_) => url_str.to_string(),
    }
}

fn title_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_schemes() {
        let validator = UrlValidator::new();

        assert!(validator.is_valid("https://example.com/article"));
        assert!(validator.is_valid("http://example.com"));
        assert!(!validator.is_valid("ftp://example.com"));
        assert!(!validator.is_valid("file:///etc/passwd"));
        assert!(!validator.is_valid("not a url"));
    }

    #[test]
    fn test_parse_url_list_keeps_only_valid_lines() {
        let validator = UrlValidator::new();
        let input = "https://a.com/x\n\nnot-a-url\n  https://b.com/y  \nftp://c.com\n";
        let urls = validator.parse_url_list(input);
        assert_eq!(urls, vec!["https://a.com/x", "https://b.com/y"]);
    }

    #[test]
    fn test_title_from_url_path() {
        let url = Url::parse("https://example.com/posts/rust-in-production_2024.html").unwrap();
        assert_eq!(title_from_url(&url), "Rust In Production 2024");
    }

    #[test]
    fn test_title_from_url_without_path_uses_host() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(title_from_url(&url), "example.com");
    }

    #[tokio::test]
    async fn test_probe_unreachable_host_is_a_warning_not_a_failure() {
        let validator = UrlValidator::new();
        let result = validator
            .probe("https://nonexistent.invalid/some-article")
            .await;

        assert_eq!(result.status, ProbeStatus::Warning);
        assert!(result.accessible);
        assert!(result.warning.is_some());
        assert_eq!(result.title, "Some Article");
    }

    #[tokio::test]
    async fn test_probe_invalid_url_is_an_error() {
        let validator = UrlValidator::new();
        let result = validator.probe("ftp://example.com/file").await;

        assert_eq!(result.status, ProbeStatus::Error);
        assert!(!result.accessible);
    }

    #[tokio::test]
    async fn test_probe_batch_collects_every_outcome() {
        let validator = UrlValidator::new();
        let urls = vec![
            "ftp://bad.example/one".to_string(),
            "https://nonexistent.invalid/two".to_string(),
            "not a url at all".to_string(),
        ];

        let results = validator.probe_batch(&urls).await;

        assert_eq!(results.len(), urls.len());
        assert_eq!(results[0].url, urls[0]);
        assert_eq!(results[0].status, ProbeStatus::Error);
        assert_eq!(results[1].status, ProbeStatus::Warning);
        assert_eq!(results[2].status, ProbeStatus::Error);
    }
}
