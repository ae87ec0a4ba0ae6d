//! `MigrationScript`: one discovered file on disk.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;

use crate::loader::Runnable;

/// A single migration file discovered by the [`crate::scanner::Scanner`].
///
/// `loaded` is filled lazily by the first loader that handles this file
/// (see [`crate::loader::LoaderRegistry::load`]); it is never shared across
/// Orchestrator calls, so a `RefCell` is sufficient — the design is
/// single-threaded per call (§5).
pub struct MigrationScript {
    pub timestamp: i64,
    pub name: String,
    pub filepath: PathBuf,
    pub content_hash: Option<String>,
    loaded: RefCell<Option<Box<dyn Runnable>>>,
}

impl MigrationScript {
    pub fn new(timestamp: i64, name: String, filepath: PathBuf, content_hash: Option<String>) -> Self {
        Self {
            timestamp,
            name,
            filepath,
            content_hash,
            loaded: RefCell::new(None),
        }
    }

    /// Returns `true` once a loader has populated `loaded`.
    pub fn is_loaded(&self) -> bool {
        self.loaded.borrow().is_some()
    }

    pub fn set_loaded(&self, runnable: Box<dyn Runnable>) {
        *self.loaded.borrow_mut() = Some(runnable);
    }

    pub fn with_loaded<R>(&self, f: impl FnOnce(&dyn Runnable) -> R) -> Option<R> {
        self.loaded.borrow().as_deref().map(f)
    }
}

impl fmt::Debug for MigrationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationScript")
            .field("timestamp", &self.timestamp)
            .field("name", &self.name)
            .field("filepath", &self.filepath)
            .field("content_hash", &self.content_hash)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Clone for MigrationScript {
    /// Clones identity, not the lazily-loaded runnable — a fresh clone is
    /// always unloaded, matching the "discarded after the Orchestrator
    /// returns" lifecycle (no long-lived sharing of loaded state).
    fn clone(&self) -> Self {
        Self::new(
            self.timestamp,
            self.name.clone(),
            self.filepath.clone(),
            self.content_hash.clone(),
        )
    }
}
