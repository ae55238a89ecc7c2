//! Determinism Property Tests
//!
//! Identifiers and scripts depend only on their inputs.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use newspeaker::core::Scriptwriter;
use newspeaker::domain::{ContentId, ExtractedText, NarrativeStyle, Summary};
use newspeaker::text::clean_text;

fn style() -> impl Strategy<Value = NarrativeStyle> {
    prop_oneof![
        Just(NarrativeStyle::Educational),
        Just(NarrativeStyle::Conversational),
        Just(NarrativeStyle::Humorous),
    ]
}

fn sentences() -> impl Strategy<Value = String> {
    prop::collection::vec("[A-Z][a-z]{2,9}( [a-z]{2,9}){2,8}[.?!]", 1..5)
        .prop_map(|sentences| sentences.join(" "))
}

fn summary_of(text: &str) -> Summary {
    let extracted = ExtractedText::new(format!("{} More context.", text), "en", 1.0);
    Summary::new(text.to_string(), 600, &extracted, "test")
}

proptest! {
    #[test]
    fn same_summary_and_style_give_identical_script(
        text in sentences(),
        style in style(),
        spanish in any::<bool>(),
    ) {
        let language = if spanish { "es" } else { "en" };
        let summary = summary_of(&text);

        let first = Scriptwriter::with_builtin_styles()
            .write(&summary, &style, language, None)
            .unwrap();
        let second = Scriptwriter::with_builtin_styles()
            .write(&summary, &style, language, None)
            .unwrap();

        prop_assert_eq!(first.text.as_bytes(), second.text.as_bytes());
        prop_assert_eq!(first.content_hash(), second.content_hash());
        prop_assert_eq!(first.estimated_duration_secs, second.estimated_duration_secs);
        prop_assert!(first.word_count > 0);
    }

    #[test]
    fn scripts_are_clean_for_speech(text in sentences(), style in style()) {
        let script = Scriptwriter::with_builtin_styles()
            .write(&summary_of(&text), &style, "en", None)
            .unwrap();

        prop_assert_eq!(clean_text(&script.text), script.text.clone());
        prop_assert!(!script.text.starts_with(' '));
    }

    #[test]
    fn content_id_depends_only_on_url_and_time(
        path in "[a-z0-9/-]{1,40}",
        secs in 0i64..4_000_000_000,
    ) {
        let url = format!("https://example.com/{}", path);
        let published = Utc.timestamp_opt(secs, 0).unwrap();

        let id = ContentId::derive(&url, &published);
        prop_assert_eq!(&id, &ContentId::derive(&url, &published));
        prop_assert_eq!(ContentId::parse(id.as_str()), Some(id.clone()));

        let later = Utc.timestamp_opt(secs + 1, 0).unwrap();
        prop_assert_ne!(id, ContentId::derive(&url, &later));
    }
}
