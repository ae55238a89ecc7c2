//! Scriptwriter: summary + narrative style -> spoken script.
//!
//! Styles are policies looked up by name in a registry, so new ones can be
//! registered at runtime. Every policy only reorders, frames and rewords the
//! summary's own sentences; the framing phrases carry no facts.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use super::errors::StyleTransformError;
use crate::domain::{hash_text, NarrativeStyle, Script, Summary};
use crate::text::{clean_text, novel_entities, remove_urls, spell_small_numbers, split_sentences};

/// Default narration pace
pub const WORDS_PER_MINUTE: u32 = 150;

/// A tone/pacing/vocabulary policy
pub trait StylePolicy: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// One-line description for listings
    fn description(&self) -> &str {
        ""
    }

    fn words_per_minute(&self) -> u32 {
        WORDS_PER_MINUTE
    }

    /// Turn the summary's sentences into narrative text.
    ///
    /// Must be a pure function of its inputs.
    fn apply(&self, sentences: &[String], language: &str) -> String;
}

/// Name -> policy lookup, shared between workers
#[derive(Clone, Default)]
pub struct StyleRegistry {
    policies: Arc<RwLock<BTreeMap<String, Arc<dyn StylePolicy>>>>,
}

impl StyleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with educational, conversational and humorous styles
    pub fn with_builtin_styles() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(EducationalStyle));
        registry.register(Arc::new(ConversationalStyle));
        registry.register(Arc::new(HumorousStyle));
        registry
    }

    /// Add or replace a policy
    pub fn register(&self, policy: Arc<dyn StylePolicy>) {
        let name = policy.name().to_lowercase();
        self.policies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, policy);
    }

    pub fn get(&self, style: &NarrativeStyle) -> Option<Arc<dyn StylePolicy>> {
        self.policies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(style.name())
            .cloned()
    }

    pub fn contains(&self, style: &NarrativeStyle) -> bool {
        self.get(style).is_some()
    }

    /// Registered (name, description) pairs, sorted by name
    pub fn list(&self) -> Vec<(String, String)> {
        self.policies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, policy)| (name.clone(), policy.description().to_string()))
            .collect()
    }
}

/// Writes scripts using the registered styles
#[derive(Clone, Default)]
pub struct Scriptwriter {
    registry: StyleRegistry,
}

impl Scriptwriter {
    pub fn new(registry: StyleRegistry) -> Self {
        Self { registry }
    }

    pub fn with_builtin_styles() -> Self {
        Self::new(StyleRegistry::with_builtin_styles())
    }

    pub fn registry(&self) -> &StyleRegistry {
        &self.registry
    }

    /// Write the script for `summary` in `style`.
    ///
    /// `speaking_rate` overrides the style's pace when the voice sets one.
    pub fn write(
        &self,
        summary: &Summary,
        style: &NarrativeStyle,
        language: &str,
        speaking_rate: Option<u32>,
    ) -> Result<Script, StyleTransformError> {
        let policy = self
            .registry
            .get(style)
            .ok_or_else(|| StyleTransformError::Unregistered(style.name().to_string()))?;

        let sentences = speakable_sentences(&summary.text);
        if sentences.is_empty() {
            return Err(StyleTransformError::EmptySummary);
        }

        let narrative = policy.apply(&sentences, language);
        let text = finalize_for_speech(&narrative, language);

        let novel = novel_entities(&text, &summary.text);
        if !novel.is_empty() {
            warn!(style = %style, entities = ?novel, "Script mentions entities absent from the summary");
        }

        let words_per_minute = speaking_rate.unwrap_or_else(|| policy.words_per_minute()).max(1);
        let word_count = text.split_whitespace().count();

        Ok(Script {
            summary_hash: hash_text(&summary.text),
            style: style.clone(),
            language: language.to_string(),
            words_per_minute,
            word_count,
            estimated_duration_secs: estimate_duration_secs(word_count, words_per_minute),
            text,
        })
    }
}

/// Sentences of a summary, URL-free and each ending in terminal punctuation
fn speakable_sentences(summary: &str) -> Vec<String> {
    let cleaned = clean_text(&remove_urls(summary));
    split_sentences(&cleaned)
        .into_iter()
        .map(|s| {
            if s.ends_with(['.', '!', '?']) {
                s.to_string()
            } else {
                format!("{}.", s.trim_end_matches([',', ';', ':']))
            }
        })
        .collect()
}

/// Speech post-processing applied to every style
pub fn finalize_for_speech(text: &str, language: &str) -> String {
    clean_text(&spell_small_numbers(&remove_urls(text), language))
}

/// Seconds needed to read `word_count` words (rounded up)
pub fn estimate_duration_secs(word_count: usize, words_per_minute: u32) -> u32 {
    let wpm = words_per_minute.max(1) as u64;
    ((word_count as u64 * 60).div_ceil(wpm)) as u32
}

fn is_spanish(language: &str) -> bool {
    language.eq_ignore_ascii_case("es")
}

/// Plain words for formal ones
struct EducationalStyle;

const EN_PLAIN_WORDS: &[(&str, &str)] = &[
    ("approximately", "about"),
    ("additionally", "also"),
    ("commence", "start"),
    ("commenced", "started"),
    ("demonstrate", "show"),
    ("demonstrated", "showed"),
    ("numerous", "many"),
    ("purchase", "buy"),
    ("subsequently", "later"),
    ("utilize", "use"),
    ("utilized", "used"),
];

const ES_PLAIN_WORDS: &[(&str, &str)] = &[
    ("adicionalmente", "además"),
    ("aproximadamente", "casi"),
    ("posteriormente", "después"),
    ("utilizar", "usar"),
    ("utilizó", "usó"),
];

fn plain_word(word: &str, table: &[(&str, &str)]) -> String {
    let core_end = word
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_alphanumeric())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let (core, tail) = word.split_at(core_end);
    let lower = core.to_lowercase();

    let Some((_, plain)) = table.iter().find(|(formal, _)| *formal == lower) else {
        return word.to_string();
    };

    let capitalized = core.chars().next().map(char::is_uppercase).unwrap_or(false);
    let replacement = if capitalized {
        let mut chars = plain.chars();
        chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect::<String>())
            .unwrap_or_default()
    } else {
        plain.to_string()
    };
    format!("{}{}", replacement, tail)
}

impl StylePolicy for EducationalStyle {
    fn name(&self) -> &str {
        "educational"
    }

    fn description(&self) -> &str {
        "Calm explainer with plain vocabulary and a key-point recap"
    }

    fn words_per_minute(&self) -> u32 {
        140
    }

    fn apply(&self, sentences: &[String], language: &str) -> String {
        let (lead, recap, table) = if is_spanish(language) {
            ("Vamos a explicarlo de forma sencilla.", "Idea clave:", ES_PLAIN_WORDS)
        } else {
            ("Here is a short explainer.", "Key point:", EN_PLAIN_WORDS)
        };

        let plain: Vec<String> = sentences
            .iter()
            .map(|s| {
                s.split_whitespace()
                    .map(|w| plain_word(w, table))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();

        let mut parts = vec![lead.to_string()];
        parts.extend(plain.iter().cloned());
        if let Some(first) = plain.first() {
            parts.push(format!("{} {}", recap, first));
        }
        parts.join(" ")
    }
}

/// Two voices trading lines, with rhetorical questions between facts
struct ConversationalStyle;

impl StylePolicy for ConversationalStyle {
    fn name(&self) -> &str {
        "conversational"
    }

    fn description(&self) -> &str {
        "Two alternating voices with rhetorical questions"
    }

    fn words_per_minute(&self) -> u32 {
        160
    }

    fn apply(&self, sentences: &[String], language: &str) -> String {
        let (first_voice, second_voice, questions, closing): (&str, &str, &[&str], &str) =
            if is_spanish(language) {
                (
                    "Primera voz:",
                    "Segunda voz:",
                    &["¿y qué pasó después?", "¿qué significa eso?", "¿algo más?"],
                    "gracias, quedó claro.",
                )
            } else {
                (
                    "First voice:",
                    "Second voice:",
                    &["what happened next?", "and what does that mean?", "anything else?"],
                    "thanks, that was clear.",
                )
            };

        let mut parts = Vec::with_capacity(sentences.len() * 2 + 1);
        for (i, sentence) in sentences.iter().enumerate() {
            if i > 0 {
                parts.push(format!("{} {}", second_voice, questions[(i - 1) % questions.len()]));
            }
            parts.push(format!("{} {}", first_voice, sentence));
        }
        parts.push(format!("{} {}", second_voice, closing));
        parts.join(" ")
    }
}

/// Light framing that jokes about the format, never the facts
struct HumorousStyle;

impl StylePolicy for HumorousStyle {
    fn name(&self) -> &str {
        "humorous"
    }

    fn description(&self) -> &str {
        "Light framing with an aside that adds no claims"
    }

    fn words_per_minute(&self) -> u32 {
        155
    }

    fn apply(&self, sentences: &[String], language: &str) -> String {
        let (lead, aside) = if is_spanish(language) {
            (
                "Prepara el café, que vienen noticias.",
                "Nota aparte: esa es la historia, sin chiste añadido.",
            )
        } else {
            (
                "Grab a coffee, the news is here.",
                "Side note: that is the story, no punchline required.",
            )
        };

        let mut parts = vec![lead.to_string()];
        parts.extend(sentences.iter().cloned());
        parts.push(aside.to_string());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExtractedText;

    fn summary(text: &str) -> Summary {
        let source = ExtractedText::new(text.to_string(), "en", 1.0);
        Summary::new(text.to_string(), 600, &source, "test")
    }

    #[test]
    fn test_educational_script() {
        let writer = Scriptwriter::with_builtin_styles();
        let script = writer
            .write(&summary("Markets rose today."), &NarrativeStyle::Educational, "en", None)
            .unwrap();

        assert_eq!(
            script.text,
            "Here is a short explainer. Markets rose today. Key point: Markets rose today."
        );
        assert_eq!(script.words_per_minute, 140);
        assert_eq!(script.word_count, 13);
        assert_eq!(script.estimated_duration_secs, 6);
        assert_eq!(script.summary_hash, hash_text("Markets rose today."));
    }

    #[test]
    fn test_educational_plain_vocabulary() {
        let writer = Scriptwriter::with_builtin_styles();
        let script = writer
            .write(
                &summary("Approximately 3 firms will subsequently purchase bonds."),
                &NarrativeStyle::Educational,
                "en",
                None,
            )
            .unwrap();

        assert!(script.text.contains("About three firms will later buy bonds."));
    }

    #[test]
    fn test_conversational_alternates_voices() {
        let writer = Scriptwriter::with_builtin_styles();
        let script = writer
            .write(
                &summary("Markets rose today. Bonds fell"),
                &NarrativeStyle::Conversational,
                "en",
                None,
            )
            .unwrap();

        assert_eq!(
            script.text,
            "First voice: Markets rose today. Second voice: what happened next? \
             First voice: Bonds fell. Second voice: thanks, that was clear."
        );
    }

    #[test]
    fn test_conversational_keeps_abbreviated_sentence_whole() {
        let writer = Scriptwriter::with_builtin_styles();
        let script = writer
            .write(
                &summary("The U.S. economy grew. Bonds fell."),
                &NarrativeStyle::Conversational,
                "en",
                None,
            )
            .unwrap();

        assert!(script.text.starts_with("First voice: The U.S. economy grew. Second voice:"));
        assert_eq!(script.text.matches("First voice:").count(), 2);
    }

    #[test]
    fn test_speech_post_processing() {
        let writer = Scriptwriter::with_builtin_styles();
        let script = writer
            .write(
                &summary("Votes: 12 of 30 seats in 2024, see https://example.com/live for more."),
                &NarrativeStyle::Humorous,
                "en",
                None,
            )
            .unwrap();

        assert!(script.text.contains("twelve of thirty seats in 2024"));
        assert!(!script.text.contains("https://"));
    }

    #[test]
    fn test_spanish_phrasing() {
        let writer = Scriptwriter::with_builtin_styles();
        let script = writer
            .write(
                &summary("Los mercados subieron 5 puntos."),
                &NarrativeStyle::Educational,
                "es",
                None,
            )
            .unwrap();

        assert!(script.text.starts_with("Vamos a explicarlo"));
        assert!(script.text.contains("subieron cinco puntos"));
    }

    #[test]
    fn test_styles_add_no_entities() {
        let writer = Scriptwriter::with_builtin_styles();
        let text = "The Fed held rates at 5.25% on Wednesday. Powell said inflation is cooling.";

        for style in [
            NarrativeStyle::Educational,
            NarrativeStyle::Conversational,
            NarrativeStyle::Humorous,
        ] {
            let script = writer.write(&summary(text), &style, "en", None).unwrap();
            assert!(
                novel_entities(&script.text, text).is_empty(),
                "{} added {:?}",
                style,
                novel_entities(&script.text, text)
            );
        }
    }

    #[test]
    fn test_unregistered_style() {
        let writer = Scriptwriter::with_builtin_styles();
        let err = writer
            .write(&summary("Markets rose today."), &NarrativeStyle::Custom("noir".into()), "en", None)
            .unwrap_err();

        assert_eq!(err, StyleTransformError::Unregistered("noir".to_string()));
    }

    #[test]
    fn test_runtime_registration_and_speaking_rate() {
        struct Headline;
        impl StylePolicy for Headline {
            fn name(&self) -> &str {
                "headline"
            }
            fn apply(&self, sentences: &[String], _language: &str) -> String {
                sentences[0].clone()
            }
        }

        let writer = Scriptwriter::with_builtin_styles();
        writer.registry().register(Arc::new(Headline));

        let style: NarrativeStyle = "Headline".parse().unwrap();
        let script = writer
            .write(&summary("Markets rose today. Bonds fell."), &style, "en", Some(120))
            .unwrap();

        assert_eq!(script.text, "Markets rose today.");
        assert_eq!(script.words_per_minute, 120);
        assert_eq!(writer.registry().list().len(), 4);
    }

    #[test]
    fn test_duration_estimate() {
        assert_eq!(estimate_duration_secs(150, 150), 60);
        assert_eq!(estimate_duration_secs(1, 150), 1);
        assert_eq!(estimate_duration_secs(0, 150), 0);
    }
}
