//! Entity-overlap check between generated text and its source.
//!
//! Summaries and scripts must not introduce facts their input lacks. We can't
//! verify facts, but we can spot new named things: capitalized words that are
//! not sentence-initial, and anything containing a digit. The check is a
//! heuristic and only used for warnings and tests.

use std::collections::BTreeSet;

use super::clean::split_sentences;

/// Candidate entity tokens found in `text` (lowercased)
pub fn entity_candidates(text: &str) -> BTreeSet<String> {
    let mut entities = BTreeSet::new();

    for sentence in split_sentences(text) {
        for (position, raw) in sentence.split_whitespace().enumerate() {
            let token = trim_token(raw);
            if token.is_empty() {
                continue;
            }
            let has_digit = token.chars().any(|c| c.is_ascii_digit());
            let capitalized = token.chars().next().map(char::is_uppercase).unwrap_or(false);

            if has_digit || (capitalized && position > 0) {
                entities.insert(token.to_lowercase());
            }
        }
    }

    entities
}

/// Entities in `candidate` that never appear anywhere in `source`
pub fn novel_entities(candidate: &str, source: &str) -> Vec<String> {
    let source_tokens: BTreeSet<String> = source
        .split_whitespace()
        .map(|raw| trim_token(raw).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    entity_candidates(candidate)
        .into_iter()
        .filter(|entity| !source_tokens.contains(entity))
        .collect()
}

fn trim_token(raw: &str) -> &str {
    raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '%')
}
