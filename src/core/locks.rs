//! Per-item exclusion.
//!
//! `ItemLocks` hands out at most one token per content id inside a process.
//! A token can additionally hold an advisory lock on the item's run
//! directory so a second process working on the same home backs off too.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use tracing::debug;

use crate::domain::ContentId;

/// Registry of items currently being processed
#[derive(Debug, Clone, Default)]
pub struct ItemLocks {
    held: Arc<Mutex<HashSet<ContentId>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the token for `id`, or None if another worker holds it
    pub fn try_acquire(&self, id: &ContentId) -> Option<ItemToken> {
        let mut held = lock_set(&self.held);
        if !held.insert(id.clone()) {
            debug!(item_id = %id, "Item token already held");
            return None;
        }

        Some(ItemToken {
            id: id.clone(),
            held: Arc::clone(&self.held),
            file: None,
        })
    }

    pub fn is_held(&self, id: &ContentId) -> bool {
        lock_set(&self.held).contains(id)
    }

    pub fn held_count(&self) -> usize {
        lock_set(&self.held).len()
    }
}

fn lock_set(set: &Mutex<HashSet<ContentId>>) -> MutexGuard<'_, HashSet<ContentId>> {
    // A panic while holding the guard can't leave the set half-updated
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Proof that the holder owns an item; released on drop
#[derive(Debug)]
pub struct ItemToken {
    id: ContentId,
    held: Arc<Mutex<HashSet<ContentId>>>,
    file: Option<File>,
}

impl ItemToken {
    pub fn id(&self) -> &ContentId {
        &self.id
    }

    /// Also take the advisory lock at `path`.
    ///
    /// Returns false if another process holds it.
    pub fn lock_file(&mut self, path: &Path) -> io::Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn holds_file_lock(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for ItemToken {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        lock_set(&self.held).remove(&self.id);
    }
}
