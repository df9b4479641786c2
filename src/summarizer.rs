//! Summarization orchestrator.
//!
//! Composes extraction, prompt construction and provider dispatch into a
//! single linear pipeline. Long content goes through a two-pass reduction:
//! each chunk is summarized briefly in prose, the chunk summaries are
//! concatenated in order, and the concatenation is summarized once more with
//! the caller's requested settings.

use crate::error::NutgrafError;
use crate::extractor::{chunk_content, ArticleSource, ExtractedArticle};
use crate::prompt::{
    build_prompt, word_count, SummaryFormat, SummaryLength, SummarySettings,
};
use crate::providers::ProviderRegistry;
use std::sync::Arc;
use tracing::{debug, info};

/// Input to a summarization call: a URL to extract, or raw text that skips
/// extraction entirely.
#[derive(Debug, Clone)]
pub enum SummaryInput {
    Url(String),
    Text {
        content: String,
        title: Option<String>,
    },
}

/// Successful generation output. `word_count` is always the whitespace-token
/// count of `text`, recomputed after the final pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub word_count: usize,
}

impl GenerationResult {
    fn from_text(text: String) -> Self {
        let word_count = word_count(&text);
        Self { text, word_count }
    }
}

/// The article that was summarized plus the generation result.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub article: ExtractedArticle,
    pub result: GenerationResult,
}

pub struct Summarizer {
    source: Arc<dyn ArticleSource>,
}

impl Summarizer {
    pub fn new(source: Arc<dyn ArticleSource>) -> Self {
        Self { source }
    }

    /// Run the full pipeline. Extraction and dispatch failures are returned
    /// as-is; nothing here retries (provider clients own transient retries).
    pub async fn generate(
        &self,
        registry: &ProviderRegistry,
        input: SummaryInput,
        settings: &SummarySettings,
    ) -> Result<SummaryOutcome, NutgrafError> {
        let article = match input {
            SummaryInput::Url(url) => self.source.extract(&url).await?,
            SummaryInput::Text { content, title } => {
                if content.trim().is_empty() {
                    return Err(NutgrafError::ValidationError(
                        "No content could be extracted or provided".to_string(),
                    ));
                }
                ExtractedArticle::manual(&content, None, title.as_deref())
            }
        };

        let result = self
            .summarize_content(registry, &article.content, settings)
            .await?;

        info!(
            url = %article.url,
            model = %settings.model,
            words = result.word_count,
            "summary generated"
        );

        Ok(SummaryOutcome { article, result })
    }

    async fn summarize_content(
        &self,
        registry: &ProviderRegistry,
        content: &str,
        settings: &SummarySettings,
    ) -> Result<GenerationResult, NutgrafError> {
        let chunks = chunk_content(content);

        if chunks.len() == 1 {
            let prompt = build_prompt(content, settings);
            let text = registry.dispatch(&prompt, &settings.model).await?;
            return Ok(GenerationResult::from_text(text));
        }

        debug!(chunks = chunks.len(), "content exceeds chunk budget, running two-pass reduction");

        // First pass: brief prose per chunk, keeping the caller's tone. Any
        // chunk failure aborts the whole operation.
        let chunk_settings = SummarySettings {
            length: SummaryLength::Brief,
            tone: settings.tone,
            format: SummaryFormat::Prose,
            model: settings.model.clone(),
            custom_word_count: None,
        };

        let mut chunk_summaries = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let prompt = build_prompt(chunk, &chunk_settings);
            let text = registry.dispatch(&prompt, &chunk_settings.model).await?;
            chunk_summaries.push(text);
        }

        // Second pass: re-summarize the ordered concatenation with the
        // caller's requested length, tone and format.
        let combined = chunk_summaries.join("\n\n");
        let prompt = build_prompt(&combined, settings);
        let text = registry.dispatch(&prompt, &settings.model).await?;
        Ok(GenerationResult::from_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::MAX_CHUNK_CHARS;
    use crate::providers::MockProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Extraction spy: serves a fixed article and counts invocations.
    struct FixedSource {
        article: ExtractedArticle,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(content: &str) -> Self {
            Self {
                article: ExtractedArticle {
                    url: "https://example.com/article".to_string(),
                    title: "Fixture".to_string(),
                    author: None,
                    publication_date: None,
                    content: content.to_string(),
                    word_count: word_count(content),
                    is_paywalled: false,
                    manual_input: false,
                },
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ArticleSource for FixedSource {
        async fn extract(&self, _url: &str) -> Result<ExtractedArticle, NutgrafError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.article.clone())
        }
    }

    fn mock_registry(provider: Arc<MockProvider>) -> ProviderRegistry {
        ProviderRegistry::with_providers(Some(provider), None)
    }

    fn long_content() -> String {
        let paragraph = "word ".repeat(500).trim_end().to_string();
        let content = vec![paragraph; 12].join("\n\n");
        assert!(content.len() > MAX_CHUNK_CHARS);
        content
    }

    #[tokio::test]
    async fn test_single_chunk_summary() {
        let source = Arc::new(FixedSource::new("A short article body."));
        let provider = Arc::new(MockProvider::new().with_response("one two three four"));
        let summarizer = Summarizer::new(source.clone());

        let outcome = summarizer
            .generate(
                &mock_registry(provider.clone()),
                SummaryInput::Url("https://example.com/article".to_string()),
                &SummarySettings::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.text, "one two three four");
        assert_eq!(outcome.result.word_count, 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_text_input_skips_extraction() {
        let source = Arc::new(FixedSource::new("unused"));
        let provider = Arc::new(MockProvider::new());
        let summarizer = Summarizer::new(source.clone());

        let outcome = summarizer
            .generate(
                &mock_registry(provider),
                SummaryInput::Text {
                    content: "Raw pasted text to summarize.".to_string(),
                    title: Some("Pasted".to_string()),
                },
                &SummarySettings::default(),
            )
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.article.manual_input);
        assert_eq!(outcome.article.title, "Pasted");
    }

    #[tokio::test]
    async fn test_empty_text_input_is_rejected() {
        let summarizer = Summarizer::new(Arc::new(FixedSource::new("unused")));
        let err = summarizer
            .generate(
                &mock_registry(Arc::new(MockProvider::new())),
                SummaryInput::Text {
                    content: "   ".to_string(),
                    title: None,
                },
                &SummarySettings::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NutgrafError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_multi_chunk_two_pass_reduction() {
        let content = long_content();
        let chunks = chunk_content(&content).len();
        assert!(chunks >= 2);

        let mut provider = MockProvider::new();
        for i in 0..chunks {
            provider = provider.with_response(format!("chunk summary {}", i));
        }
        let provider = Arc::new(provider.with_response("final merged summary"));

        let summarizer = Summarizer::new(Arc::new(FixedSource::new(&content)));
        let outcome = summarizer
            .generate(
                &mock_registry(provider.clone()),
                SummaryInput::Url("https://example.com/long".to_string()),
                &SummarySettings::default(),
            )
            .await
            .unwrap();

        // One dispatch per chunk plus the final reduction pass.
        assert_eq!(provider.call_count(), chunks + 1);
        assert_eq!(outcome.result.text, "final merged summary");
        // Word count is recomputed from the final text, never carried over.
        assert_eq!(outcome.result.word_count, 3);
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_whole_operation() {
        let content = long_content();
        let chunks = chunk_content(&content).len();
        assert!(chunks >= 3);

        let provider = Arc::new(
            MockProvider::new()
                .with_response("chunk summary 0")
                .with_failure(NutgrafError::ProviderError {
                    service: "OpenAI".to_string(),
                    message: "boom".to_string(),
                }),
        );

        let summarizer = Summarizer::new(Arc::new(FixedSource::new(&content)));
        let err = summarizer
            .generate(
                &mock_registry(provider.clone()),
                SummaryInput::Url("https://example.com/long".to_string()),
                &SummarySettings::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, NutgrafError::ProviderError { .. }));
        // The failing second chunk stops the pipeline: no later chunk and no
        // merge pass is attempted.
        assert_eq!(provider.call_count(), 2);
    }
}
