//! Episode library: where published audio ends up.
//!
//! # Storage Layout
//!
//! ```text
//! ~/.newspeaker/library/
//! ├── catalog.json              # Index of all published episodes
//! └── <content_id>/             # SHA256(url + published_at)[0:16]
//!     ├── episode.wav           # Synthesized audio
//!     ├── metadata.json         # Title, URL, style, backend, duration
//!     └── script.txt            # Narration that was spoken
//! ```

pub mod catalog;
pub mod episode;

pub use catalog::{Catalog, CatalogEntry};
pub use episode::{EpisodeRecord, Library};
