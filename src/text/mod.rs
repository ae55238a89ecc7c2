//! Pure text helpers: cleanup, sentence splitting, speech normalization and
//! the entity-overlap check.

pub mod clean;
pub mod grounding;

pub use clean::{
    clean_text, html_to_text, looks_like_html, remove_urls,
    spell_small_numbers, split_sentences, truncate_chars, HtmlDocument,
};
pub use grounding::{entity_candidates, novel_entities};
