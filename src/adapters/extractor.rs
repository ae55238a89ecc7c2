//! HTML/plain-text article extractor.

use async_trait::async_trait;
use tracing::debug;

use super::Extractor;
use crate::core::errors::ExtractionError;
use crate::core::pipeline::PipelineSettings;
use crate::domain::ExtractedText;
use crate::text::{clean_text, html_to_text, looks_like_html};

/// Extractor for article pages and plain-text bodies
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    min_chars: usize,
    max_payload_bytes: u64,
    supported_languages: Vec<String>,
    default_language: String,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

impl HtmlExtractor {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            min_chars: settings.min_extract_chars,
            max_payload_bytes: settings.max_payload_bytes,
            supported_languages: settings
                .supported_languages
                .iter()
                .map(|l| l.to_lowercase())
                .collect(),
            default_language: settings.default_language.to_lowercase(),
        }
    }

    /// Primary subtag of a language tag ("es-MX" -> "es")
    fn normalize_language(tag: &str) -> String {
        tag.trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    fn clean(&self, raw_payload: &str) -> Result<String, ExtractionError> {
        if !looks_like_html(raw_payload) {
            return Ok(clean_text(raw_payload));
        }

        let doc = html_to_text(raw_payload)
            .map_err(|e| ExtractionError::Malformed(format!("unreadable HTML: {}", e)))?;
        let body = clean_text(&doc.body);
        Ok(match doc.title {
            Some(title) if !title.is_empty() && !body.starts_with(&title) => {
                clean_text(&format!("{}. {}", title.trim_end_matches('.'), body))
            }
            _ => body,
        })
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    fn name(&self) -> &str {
        "html"
    }

    async fn extract(
        &self,
        raw_payload: &str,
        source_url: &str,
        declared_language: Option<&str>,
    ) -> Result<ExtractedText, ExtractionError> {
        let size = raw_payload.len() as u64;
        if size > self.max_payload_bytes {
            return Err(ExtractionError::PayloadTooLarge {
                actual: size,
                limit: self.max_payload_bytes,
            });
        }
        if raw_payload.contains('\0') {
            return Err(ExtractionError::Malformed("payload contains NUL bytes".to_string()));
        }

        let language = declared_language
            .map(Self::normalize_language)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.default_language.clone());
        if !self.supported_languages.contains(&language) {
            return Err(ExtractionError::UnsupportedLanguage(language));
        }

        let text = self.clean(raw_payload)?;
        let chars = text.chars().count();
        if chars < self.min_chars {
            return Err(ExtractionError::TooShort {
                chars,
                min: self.min_chars,
            });
        }

        let confidence = if raw_payload.is_empty() {
            0.0
        } else {
            (text.len() as f32 / raw_payload.trim().len().max(1) as f32).clamp(0.0, 1.0)
        };

        debug!(source_url, chars, confidence, "Extracted article text");
        Ok(ExtractedText::new(text, language, confidence))
    }
}
