//! Offline extractive summarizer.
//!
//! Scores sentences by the frequency of their content words and keeps the
//! best ones, in their original order, until the length bound is reached.
//! Copying sentences verbatim means the summary cannot introduce entities
//! the article does not contain.

use std::collections::HashMap;

use async_trait::async_trait;

use super::Summarizer;
use crate::core::errors::SummarizationError;
use crate::domain::{ExtractedText, Summary};
use crate::text::{split_sentences, truncate_chars};

/// Texts shorter than this are already summary-sized
const PASSTHROUGH_WORDS: usize = 80;

const STOPWORDS: &[&str] = &[
    // en
    "the", "and", "for", "that", "with", "this", "from", "are", "was", "were", "has", "have",
    "had", "but", "not", "its", "their", "they", "will", "would", "been", "which", "said",
    "into", "about", "after", "than", "also", "more", "over",
    // es
    "que", "los", "las", "del", "por", "una", "con", "para", "como", "pero", "sus", "más",
    "este", "esta", "entre", "sobre", "también", "fue", "han", "según",
];

#[derive(Debug, Clone, Default)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self
    }

    fn content_words(sentence: &str) -> impl Iterator<Item = String> + '_ {
        sentence
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 3)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
    }

    /// Select sentences for a summary of at most `max_chars`
    pub fn select(text: &str, max_chars: usize) -> String {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return String::new();
        }

        let mut frequencies: HashMap<String, usize> = HashMap::new();
        for word in sentences.iter().flat_map(|s| Self::content_words(s)) {
            *frequencies.entry(word).or_default() += 1;
        }

        let mut scored: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(idx, sentence)| {
                let words: Vec<String> = Self::content_words(sentence).collect();
                let total: usize = words.iter().filter_map(|w| frequencies.get(w)).sum();
                let score = if words.is_empty() {
                    0.0
                } else {
                    total as f64 / words.len() as f64
                };
                // Lead sentences carry the news
                let position_bonus = if idx == 0 { 1.0 } else { 0.0 };
                (idx, score + position_bonus)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut chosen: Vec<usize> = Vec::new();
        let mut length = 0;
        for (idx, _) in scored {
            let sentence_len = sentences[idx].chars().count();
            let extra = if chosen.is_empty() { sentence_len } else { sentence_len + 1 };
            if length + extra <= max_chars {
                chosen.push(idx);
                length += extra;
            }
        }

        if chosen.is_empty() {
            return truncate_chars(sentences[0], max_chars);
        }

        chosen.sort_unstable();
        chosen
            .into_iter()
            .map(|idx| sentences[idx])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn summarize(
        &self,
        text: &ExtractedText,
        max_chars: usize,
    ) -> Result<Summary, SummarizationError> {
        let summary = if text.word_count < PASSTHROUGH_WORDS && text.char_count <= max_chars {
            text.text.clone()
        } else {
            Self::select(&text.text, max_chars)
        };

        if summary.trim().is_empty() {
            return Err(SummarizationError::EmptyOutput);
        }

        Ok(Summary::new(summary, max_chars, text, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::novel_entities;

    const ARTICLE: &str = "Stocks rallied on Monday as investors cheered strong earnings. \
        The weather in the capital was mild. \
        Technology stocks led the rally, with chip makers posting strong earnings gains. \
        Analysts said earnings season had started well for stocks. \
        A local bakery opened a new branch.";

    #[tokio::test]
    async fn test_short_text_passes_through() {
        let text = ExtractedText::new("Breaking news: markets rise.".to_string(), "en", 1.0);
        let summary = ExtractiveSummarizer::new().summarize(&text, 200).await.unwrap();

        assert_eq!(summary.text, "Breaking news: markets rise.");
        assert_eq!(summary.model, "extractive");
        assert_eq!(summary.source_hash, text.content_hash());
    }

    #[tokio::test]
    async fn test_summary_respects_bound_and_order() {
        let text = ExtractedText::new(ARTICLE.to_string(), "en", 1.0);
        let summary = ExtractiveSummarizer::new().summarize(&text, 160).await.unwrap();

        assert!(summary.within_bound(), "{} chars", summary.char_count());
        assert!(summary.text.starts_with("Stocks rallied on Monday"));
        assert!(!summary.text.contains("bakery"));
        assert!(novel_entities(&summary.text, ARTICLE).is_empty());
    }

    #[tokio::test]
    async fn test_long_first_sentence_is_truncated() {
        let long = "word ".repeat(100);
        let text = ExtractedText::new(long.trim().to_string(), "en", 1.0);
        let summary = ExtractiveSummarizer::new().summarize(&text, 50).await.unwrap();

        assert!(summary.within_bound());
        assert!(!summary.text.is_empty());
    }

    #[test]
    fn test_selection_is_deterministic() {
        assert_eq!(
            ExtractiveSummarizer::select(ARTICLE, 200),
            ExtractiveSummarizer::select(ARTICLE, 200)
        );
    }
}
