//! The code loader (§4.3 / §9).
//!
//! The original design dynamically imports a script file and expects it to
//! export exactly one constructor with an `up` method. Rust has no
//! equivalent of importing arbitrary compiled code at runtime, so this is
//! expressed as a registry: the caller registers one [`Runnable`] per
//! discovered `.rs` file's timestamp before the Orchestrator runs. A
//! timestamp with no registration, or a second registration attempt for a
//! timestamp already claimed, reproduces the "zero or multiple instances"
//! error from the original design.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{MigrationLoader, Runnable};
use crate::error::CoreError;
use crate::script::MigrationScript;

pub struct CodeMigrationLoader {
    registered: Mutex<HashMap<i64, Box<dyn Runnable>>>,
}

impl CodeMigrationLoader {
    pub const NAME: &'static str = "code";

    pub fn new() -> Self {
        Self {
            registered: Mutex::new(HashMap::new()),
        }
    }

    /// Register the runnable that a `.rs` migration file resolves to.
    ///
    /// # Errors
    /// Returns [`CoreError::AmbiguousCodeMigration`] if `timestamp` is
    /// already registered (the Rust analogue of a file exporting more than
    /// one constructor).
    pub fn register(&self, timestamp: i64, runnable: Box<dyn Runnable>) -> Result<(), CoreError> {
        let mut registered = self.registered.lock().expect("code loader registry poisoned");
        if registered.contains_key(&timestamp) {
            return Err(CoreError::AmbiguousCodeMigration {
                file: format!("timestamp {timestamp}"),
                found: 2,
            });
        }
        registered.insert(timestamp, runnable);
        Ok(())
    }
}

impl Default for CodeMigrationLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationLoader for CodeMigrationLoader {
    fn get_name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("rs")
    }

    fn load(&self, script: &MigrationScript) -> Result<Box<dyn Runnable>, CoreError> {
        let mut registered = self.registered.lock().expect("code loader registry poisoned");
        registered.remove(&script.timestamp).ok_or_else(|| CoreError::AmbiguousCodeMigration {
            file: script.name.clone(),
            found: 0,
        })
    }
}

/// Lets an `Arc<CodeMigrationLoader>` be registered into a [`super::LoaderRegistry`]
/// while the caller keeps its own handle to register runnables on.
impl<T: MigrationLoader + ?Sized> MigrationLoader for Arc<T> {
    fn get_name(&self) -> &str {
        (**self).get_name()
    }

    fn can_handle(&self, path: &Path) -> bool {
        (**self).can_handle(path)
    }

    fn load(&self, script: &MigrationScript) -> Result<Box<dyn Runnable>, CoreError> {
        (**self).load(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ExecutionContext;
    use std::path::PathBuf;

    struct NoopRunnable;
    impl Runnable for NoopRunnable {
        fn up(&self, _ctx: &ExecutionContext<'_>) -> Result<String, CoreError> {
            Ok("ok".into())
        }
    }

    #[test]
    fn can_handle_only_rs_files() {
        let loader = CodeMigrationLoader::new();
        assert!(loader.can_handle(Path::new("1_create.rs")));
        assert!(!loader.can_handle(Path::new("1_create.up.sql")));
    }

    #[test]
    fn second_registration_for_same_timestamp_is_ambiguous() {
        let loader = CodeMigrationLoader::new();
        loader.register(1, Box::new(NoopRunnable)).unwrap();
        let err = loader.register(1, Box::new(NoopRunnable));
        assert!(matches!(err, Err(CoreError::AmbiguousCodeMigration { found: 2, .. })));
    }

    #[test]
    fn loading_unregistered_timestamp_is_ambiguous() {
        let loader = CodeMigrationLoader::new();
        let script = MigrationScript::new(7, "7_thing.rs".into(), PathBuf::from("7_thing.rs"), None);
        let err = loader.load(&script);
        assert!(matches!(err, Err(CoreError::AmbiguousCodeMigration { found: 0, .. })));
    }

    #[test]
    fn load_consumes_the_registration() {
        let loader = CodeMigrationLoader::new();
        loader.register(7, Box::new(NoopRunnable)).unwrap();
        let script = MigrationScript::new(7, "7_thing.rs".into(), PathBuf::from("7_thing.rs"), None);

        assert!(loader.load(&script).is_ok());
        assert!(loader.load(&script).is_err());
    }
}
