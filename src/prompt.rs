//! Deterministic prompt construction for summary generation.
//!
//! The builder is a pure function of its inputs: identical settings and
//! content always produce byte-identical prompt text.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLength {
    Brief,
    Standard,
    InDepth,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryTone {
    Neutral,
    Conversational,
    Professional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFormat {
    Prose,
    Bullets,
}

impl SummaryLength {
    /// Unknown values fall back to `Standard`. Leniency here is a policy,
    /// not an oversight: callers send free-form strings.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "brief" => SummaryLength::Brief,
            "in_depth" => SummaryLength::InDepth,
            "custom" => SummaryLength::Custom,
            _ => SummaryLength::Standard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryLength::Brief => "brief",
            SummaryLength::Standard => "standard",
            SummaryLength::InDepth => "in_depth",
            SummaryLength::Custom => "custom",
        }
    }
}

impl SummaryTone {
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "conversational" => SummaryTone::Conversational,
            "professional" => SummaryTone::Professional,
            _ => SummaryTone::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryTone::Neutral => "neutral",
            SummaryTone::Conversational => "conversational",
            SummaryTone::Professional => "professional",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            SummaryTone::Neutral => "Use a neutral, objective tone.",
            SummaryTone::Conversational => {
                "Use a conversational, friendly tone as if explaining to a colleague."
            }
            SummaryTone::Professional => {
                "Use a formal, professional tone suitable for business contexts."
            }
        }
    }
}

impl SummaryFormat {
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "bullets" => SummaryFormat::Bullets,
            _ => SummaryFormat::Prose,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryFormat::Prose => "prose",
            SummaryFormat::Bullets => "bullets",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            SummaryFormat::Prose => "Write in continuous prose paragraphs.",
            SummaryFormat::Bullets => "Use bullet points to organize the key information.",
        }
    }
}

/// Caller-selected generation settings, shared by the orchestrator and the
/// gateway.
#[derive(Debug, Clone)]
pub struct SummarySettings {
    pub length: SummaryLength,
    pub tone: SummaryTone,
    pub format: SummaryFormat,
    pub model: String,
    pub custom_word_count: Option<u32>,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            length: SummaryLength::Standard,
            tone: SummaryTone::Neutral,
            format: SummaryFormat::Prose,
            model: "gpt-3.5-turbo".to_string(),
            custom_word_count: None,
        }
    }
}

impl SummarySettings {
    /// Target word count. `Custom` without a positive word count falls back
    /// to the `Standard` target; for other lengths the custom count is
    /// ignored.
    pub fn target_words(&self) -> u32 {
        match self.length {
            SummaryLength::Brief => 100,
            SummaryLength::Standard => 250,
            SummaryLength::InDepth => 500,
            SummaryLength::Custom => match self.custom_word_count {
                Some(n) if n > 0 => n,
                _ => 250,
            },
        }
    }
}

/// Render the model-agnostic instruction payload for a generation request.
pub fn build_prompt(content: &str, settings: &SummarySettings) -> String {
    format!(
        "You are an expert at creating high-quality, paraphrased summaries of articles. \
Your task is to analyze the following article content and create a comprehensive summary \
that captures all salient facts and claims without using direct quotes.\n\
\n\
INSTRUCTIONS:\n\
- Target length: approximately {target_words} words\n\
- {tone}\n\
- {format}\n\
- Focus on factual information, key insights, and important claims\n\
- Paraphrase everything - do not use direct quotes\n\
- Maintain accuracy while making the content accessible\n\
- Include specific numbers, dates, and concrete details when relevant\n\
- Organize information logically and coherently\n\
\n\
ARTICLE CONTENT:\n\
{content}\n\
\n\
SUMMARY:",
        target_words = settings.target_words(),
        tone = settings.tone.instruction(),
        format = settings.format.instruction(),
        content = content,
    )
}

/// Whitespace-token word count, used for every reported word count in the
/// pipeline.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(length: SummaryLength, cwc: Option<u32>) -> SummarySettings {
        SummarySettings {
            length,
            custom_word_count: cwc,
            ..SummarySettings::default()
        }
    }

    #[test]
    fn test_target_words() {
        assert_eq!(settings(SummaryLength::Brief, None).target_words(), 100);
        assert_eq!(settings(SummaryLength::Standard, None).target_words(), 250);
        assert_eq!(settings(SummaryLength::InDepth, None).target_words(), 500);
        assert_eq!(settings(SummaryLength::Custom, Some(300)).target_words(), 300);
    }

    #[test]
    fn test_custom_without_count_falls_back_to_standard() {
        assert_eq!(settings(SummaryLength::Custom, None).target_words(), 250);
        assert_eq!(settings(SummaryLength::Custom, Some(0)).target_words(), 250);
    }

    #[test]
    fn test_custom_count_ignored_for_fixed_lengths() {
        assert_eq!(settings(SummaryLength::Brief, Some(900)).target_words(), 100);
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let s = settings(SummaryLength::Brief, None);
        let a = build_prompt("Some article text.", &s);
        let b = build_prompt("Some article text.", &s);
        assert_eq!(a, b);
        assert!(a.contains("approximately 100 words"));
        assert!(a.contains("Use a neutral, objective tone."));
        assert!(a.contains("Write in continuous prose paragraphs."));
        assert!(a.ends_with("SUMMARY:"));
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(SummaryTone::parse_lenient("sarcastic"), SummaryTone::Neutral);
        assert_eq!(SummaryFormat::parse_lenient("haiku"), SummaryFormat::Prose);
        assert_eq!(SummaryLength::parse_lenient("huge"), SummaryLength::Standard);
        assert_eq!(SummaryLength::parse_lenient("in_depth"), SummaryLength::InDepth);
    }

    #[test]
    fn test_word_count_is_whitespace_tokens() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  one   two\nthree\t four "), 4);
    }
}
