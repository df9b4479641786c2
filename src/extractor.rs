//! Article content extraction.
//!
//! Fetches a page, strips navigation and boilerplate, isolates the main
//! article body, and derives title/author/publication date from structured
//! metadata when present. Manual-text mode wraps caller-supplied text
//! without any network access.

use crate::error::NutgrafError;
use crate::prompt::word_count;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Content beyond this many characters is split for two-pass summarization.
pub const MAX_CHUNK_CHARS: usize = 12_000;

/// Container elements whose text is never article content.
const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "form", "script", "style", "noscript",
];

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtractedArticle {
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub publication_date: Option<DateTime<Utc>>,
    pub content: String,
    pub word_count: usize,
    pub is_paywalled: bool,
    pub manual_input: bool,
}

impl ExtractedArticle {
    /// Wrap manually supplied text; no fetch, no publication date.
    pub fn manual(text: &str, url: Option<&str>, title: Option<&str>) -> Self {
        Self {
            url: url.unwrap_or("Manual Input").to_string(),
            title: title.unwrap_or("Manual Input").to_string(),
            author: None,
            publication_date: None,
            content: text.to_string(),
            word_count: word_count(text),
            is_paywalled: false,
            manual_input: true,
        }
    }
}

/// Seam between the orchestrator and the extraction machinery, so the
/// pipeline can be exercised without network access.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedArticle, NutgrafError>;
}

#[derive(Clone)]
pub struct ArticleExtractor {
    client: Client,
}

impl Default for ArticleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArticleExtractor {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(crate::USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|e| {
                panic!("Failed to initialize extraction HTTP client: {}", e);
            });
        Self { client }
    }

    /// Parse already-fetched HTML into an article. Pure of network effects;
    /// `extract` delegates here after the fetch.
    pub fn extract_from_html(&self, html: &str, url: &str) -> Result<ExtractedArticle, NutgrafError> {
        let document = Html::parse_document(html);

        let title = extract_title(&document)
            .unwrap_or_else(|| crate::validator::title_from_url_lossy(url));
        let author = extract_author(&document);
        let publication_date = extract_publication_date(&document);
        let content = extract_body(&document);

        if content.trim().is_empty() {
            return Err(NutgrafError::ExtractionFailure(
                "No readable article content found on the page".to_string(),
            ));
        }

        let words = word_count(&content);
        let is_paywalled = words < 150 && has_paywall_markers(html);
        if is_paywalled {
            debug!(url = %url, words, "extracted content looks paywalled");
        }

        Ok(ExtractedArticle {
            url: url.to_string(),
            title,
            author,
            publication_date,
            content,
            word_count: words,
            is_paywalled,
            manual_input: false,
        })
    }

}

/// Split long content into ordered, non-overlapping chunks at paragraph
/// boundaries, falling back to sentence boundaries for oversized paragraphs.
/// Content within the budget comes back as a single chunk.
pub fn chunk_content(content: &str) -> Vec<String> {
    if content.len() <= MAX_CHUNK_CHARS {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in content.split("\n\n") {
        let pieces: Vec<&str> = if paragraph.len() > MAX_CHUNK_CHARS {
            split_sentences(paragraph)
        } else {
            vec![paragraph]
        };

        for piece in pieces {
            if !current.is_empty() && current.len() + piece.len() + 2 > MAX_CHUNK_CHARS {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl ArticleSource for ArticleExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedArticle, NutgrafError> {
        debug!(url = %url, "fetching article");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "article fetch failed");
            NutgrafError::ExtractionFailure(format!("Failed to fetch page: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NutgrafError::ExtractionFailure(format!(
                "Page fetch returned status {}",
                status
            )));
        }

        let html = response.text().await.map_err(|e| {
            NutgrafError::ExtractionFailure(format!("Failed to read page body: {}", e))
        })?;

        let article = self.extract_from_html(&html, url)?;
        debug!(
            url = %url,
            words = article.word_count,
            paywalled = article.is_paywalled,
            "article extracted"
        );
        Ok(article)
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let og_title_selector = Selector::parse("meta[property='og:title']").ok()?;
    let title_selector = Selector::parse("title").ok()?;
    let h1_selector = Selector::parse("h1").ok()?;

    document
        .select(&og_title_selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string)
        .or_else(|| {
            document
                .select(&title_selector)
                .next()
                .map(|el| el.text().collect::<String>())
        })
        .or_else(|| {
            document
                .select(&h1_selector)
                .next()
                .map(|el| el.text().collect::<String>())
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_author(document: &Html) -> Option<String> {
    let meta_selectors = [
        "meta[name='author']",
        "meta[property='article:author']",
        "meta[name='twitter:creator']",
    ];
    for selector_str in meta_selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(author) = document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("content"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && !s.starts_with("http"))
            {
                return Some(author);
            }
        }
    }

    // Byline elements as a heuristic fallback.
    for selector_str in ["[rel='author']", ".byline", ".author"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(author) = document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && s.len() < 100)
            {
                return Some(author);
            }
        }
    }
    None
}

fn extract_publication_date(document: &Html) -> Option<DateTime<Utc>> {
    let meta_selectors = [
        "meta[property='article:published_time']",
        "meta[name='date']",
        "meta[itemprop='datePublished']",
    ];
    for selector_str in meta_selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(date) = document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("content"))
                .and_then(parse_date)
            {
                return Some(date);
            }
        }
    }

    let time_selector = Selector::parse("time[datetime]").ok()?;
    document
        .select(&time_selector)
        .next()
        .and_then(|el| el.value().attr("datetime"))
        .and_then(parse_date)
}

/// Unparseable dates become `None`, never an extraction failure.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

/// Isolate the main article body: prefer semantic containers, fall back to
/// every paragraph not nested in boilerplate chrome.
fn extract_body(document: &Html) -> String {
    for selector_str in ["article p", "main p", "[itemprop='articleBody'] p"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            let text = join_paragraphs(document.select(&selector));
            if word_count(&text) >= 50 {
                return text;
            }
        }
    }

    let paragraph_selector = match Selector::parse("p") {
        Ok(selector) => selector,
        Err(_) => return String::new(),
    };
    let paragraphs = document
        .select(&paragraph_selector)
        .filter(|el| !inside_boilerplate(el));
    join_paragraphs(paragraphs)
}

fn join_paragraphs<'a>(elements: impl Iterator<Item = ElementRef<'a>>) -> String {
    elements
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn inside_boilerplate(element: &ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|el| BOILERPLATE_TAGS.contains(&el.name()))
            .unwrap_or(false)
    })
}

fn has_paywall_markers(html: &str) -> bool {
    let lowered = html.to_lowercase();
    ["paywall", "subscribe to continue", "subscription required", "metered-content"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (idx, _) in paragraph.match_indices(". ") {
        sentences.push(&paragraph[start..=idx]);
        start = idx + 2;
    }
    if start < paragraph.len() {
        sentences.push(&paragraph[start..]);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_HTML: &str = r#"
        <html>
          <head>
            <title>Fallback Title</title>
            <meta property="og:title" content="The Real Headline">
            <meta name="author" content="Jane Doe">
            <meta property="article:published_time" content="2024-03-05T10:30:00Z">
          </head>
          <body>
            <nav><p>Home | About | Contact</p></nav>
            <article>
              <p>First paragraph of the article body with enough words to count as content.
                 It keeps going for a while so the heuristics accept it as the main body of
                 the page rather than chrome.</p>
              <p>Second paragraph adds more detail and more words so that the fifty word
                 minimum for the semantic container heuristic is comfortably cleared in
                 this small test fixture document.</p>
            </article>
            <footer><p>Copyright 2024</p></footer>
          </body>
        </html>
    "#;

    #[test]
    fn test_extract_from_html_reads_metadata() {
        let extractor = ArticleExtractor::new();
        let article = extractor
            .extract_from_html(ARTICLE_HTML, "https://example.com/post")
            .unwrap();

        assert_eq!(article.title, "The Real Headline");
        assert_eq!(article.author.as_deref(), Some("Jane Doe"));
        let date = article.publication_date.unwrap();
        assert_eq!(date.to_rfc3339(), "2024-03-05T10:30:00+00:00");
        assert!(!article.manual_input);
        assert!(article.content.starts_with("First paragraph"));
        assert!(!article.content.contains("Copyright"));
        assert!(!article.content.contains("Home | About"));
    }

    #[test]
    fn test_extract_from_html_without_content_fails() {
        let extractor = ArticleExtractor::new();
        let err = extractor
            .extract_from_html("<html><body><nav><p>menu</p></nav></body></html>", "https://example.com")
            .unwrap_err();
        assert!(matches!(err, NutgrafError::ExtractionFailure(_)));
    }

    #[test]
    fn test_manual_input_wraps_text() {
        let article = ExtractedArticle::manual("one two three", None, Some("My Notes"));
        assert_eq!(article.word_count, 3);
        assert_eq!(article.title, "My Notes");
        assert_eq!(article.url, "Manual Input");
        assert!(article.manual_input);
        assert!(article.publication_date.is_none());
    }

    #[test]
    fn test_chunk_short_content_is_single_chunk() {
        let chunks = chunk_content("short content");
        assert_eq!(chunks, vec!["short content".to_string()]);
    }

    #[test]
    fn test_chunk_long_content_splits_at_paragraphs() {
        let paragraph = "word ".repeat(500).trim_end().to_string();
        let content = vec![paragraph.clone(); 12].join("\n\n");
        assert!(content.len() > MAX_CHUNK_CHARS);

        let chunks = chunk_content(&content);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_CHUNK_CHARS);
        }
        // Non-overlapping and ordered: re-joining restores the original.
        assert_eq!(chunks.join("\n\n"), content);
    }

    #[test]
    fn test_unparseable_date_is_none() {
        assert!(parse_date("last Tuesday").is_none());
        assert!(parse_date("2024-03-05").is_some());
    }
}
