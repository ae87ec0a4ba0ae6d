//! Loader Registry (§4.3): selects a loader per file extension and produces
//! a [`Runnable`] from a discovered [`MigrationScript`].

mod code;
mod sql;

pub use code::CodeMigrationLoader;
pub use sql::SqlMigrationLoader;

use std::any::Any;
use std::path::Path;

use crate::error::CoreError;
use crate::ledger::MigrationInfo;
use crate::script::MigrationScript;
use crate::interfaces::DbHandle;

/// Everything a script needs to run: the database handle, the ledger
/// record being built for it, and the caller-supplied "handler" object
/// (§9: "the handler holds a DB, and scripts receive both" — modeled here
/// as a plain borrowed record rather than a back-pointer).
pub struct ExecutionContext<'a> {
    pub db: &'a dyn DbHandle,
    pub info: &'a MigrationInfo,
    pub handler: &'a (dyn Any + Send + Sync),
}

/// A runnable produced by a loader from one migration file.
pub trait Runnable: Send + Sync {
    /// Apply the migration; returns an opaque textual result stored in the ledger.
    fn up(&self, ctx: &ExecutionContext<'_>) -> Result<String, CoreError>;

    /// Reverse the migration. The default implementation reports that no
    /// `down` is available, matching "missing `down`" handling in §4.8.
    fn down(&self, _ctx: &ExecutionContext<'_>) -> Result<String, CoreError> {
        Err(CoreError::Other("no down() available for this migration".into()))
    }

    /// Whether `down` is meaningfully implemented (vs. the default stub).
    fn has_down(&self) -> bool {
        false
    }
}

/// The "IMigrationScriptLoader" interface (§6).
pub trait MigrationLoader: Send + Sync {
    fn get_name(&self) -> &str;
    fn can_handle(&self, path: &Path) -> bool;
    fn load(&self, script: &MigrationScript) -> Result<Box<dyn Runnable>, CoreError>;
}

/// Ordered list of loaders; `find_loader` returns the first match.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn MigrationLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self { loaders: Vec::new() }
    }

    /// The two default loaders, in the order the Scanner should prefer them.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SqlMigrationLoader::new()));
        registry.register(Box::new(CodeMigrationLoader::new()));
        registry
    }

    pub fn register(&mut self, loader: Box<dyn MigrationLoader>) {
        self.loaders.push(loader);
    }

    pub fn find_loader(&self, path: &Path) -> Option<&dyn MigrationLoader> {
        self.loaders.iter().find(|l| l.can_handle(path)).map(|b| b.as_ref())
    }

    /// Loads a script's runnable, memoizing it on the script itself.
    pub fn load(&self, script: &MigrationScript) -> Result<(), CoreError> {
        if script.is_loaded() {
            return Ok(());
        }
        let loader = self
            .find_loader(&script.filepath)
            .ok_or_else(|| CoreError::NoLoaderForFile(script.name.clone()))?;
        let runnable = loader.load(script)?;
        script.set_loaded(runnable);
        Ok(())
    }

    /// `true` if this registry would serve `path` with the SQL loader specifically.
    pub fn is_sql(&self, path: &Path) -> bool {
        self.find_loader(path)
            .map(|l| l.get_name() == SqlMigrationLoader::NAME)
            .unwrap_or(false)
    }

    /// `true` if this registry would serve `path` with the code loader specifically.
    pub fn is_code(&self, path: &Path) -> bool {
        self.find_loader(path)
            .map(|l| l.get_name() == CodeMigrationLoader::NAME)
            .unwrap_or(false)
    }

    /// A pending set is hybrid (§4.3) if it is served by more than one loader.
    pub fn is_hybrid<'a>(&self, paths: impl Iterator<Item = &'a Path>) -> bool {
        let mut seen_sql = false;
        let mut seen_code = false;
        for path in paths {
            seen_sql |= self.is_sql(path);
            seen_code |= self.is_code(path);
            if seen_sql && seen_code {
                return true;
            }
        }
        false
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
