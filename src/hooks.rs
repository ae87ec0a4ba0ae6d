//! Hook Dispatcher (§4.9): optional lifecycle callbacks, composed as a list
//! of bundles rather than through virtual dispatch.
//!
//! Modeled as a record of `Option<Box<dyn Fn>>` fields, each called if
//! present and otherwise silently skipped, the same shape `metrics.rs`
//! uses for its own optional instrumentation callbacks.

use crate::error::CoreError;
use crate::ledger::MigrationInfo;
use crate::result::MigrationResult;
use crate::script::MigrationScript;

type StrHook = Box<dyn for<'a> Fn(&'a str) -> Result<(), CoreError> + Send + Sync>;

/// One bundle of optional lifecycle hooks. Any field may be left `None`;
/// absence is not an error.
#[derive(Default)]
pub struct Hooks {
    pub on_start: Option<Box<dyn Fn(usize, usize) -> Result<(), CoreError> + Send + Sync>>,
    pub on_before_backup: Option<Box<dyn Fn() -> Result<(), CoreError> + Send + Sync>>,
    pub on_after_backup: Option<StrHook>,
    pub on_before_migrate: Option<Box<dyn Fn(&MigrationScript) -> Result<(), CoreError> + Send + Sync>>,
    pub on_after_migrate:
        Option<Box<dyn Fn(&MigrationScript, &MigrationInfo) -> Result<(), CoreError> + Send + Sync>>,
    pub on_migration_error:
        Option<Box<dyn Fn(&MigrationScript, &CoreError) -> Result<(), CoreError> + Send + Sync>>,
    pub on_before_restore: Option<StrHook>,
    pub on_after_restore: Option<StrHook>,
    pub on_complete: Option<Box<dyn Fn(&MigrationResult) -> Result<(), CoreError> + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&CoreError) -> Result<(), CoreError> + Send + Sync>>,
}

/// A composite bundle: fans out to each registered [`Hooks`] in registration
/// order. A hook that returns an error is logged and otherwise ignored — the
/// system already classifies real work failures independently of hook
/// outcomes (§4.9).
#[derive(Default)]
pub struct HookDispatcher {
    bundles: Vec<Hooks>,
}

macro_rules! dispatch {
    ($self:ident, $name:literal, $field:ident $(, $arg:expr )*) => {
        for bundle in &$self.bundles {
            if let Some(hook) = bundle.$field.as_ref() {
                if let Err(e) = hook($($arg),*) {
                    log::warn!(concat!("hook ", $name, " failed: {}"), e);
                }
            }
        }
    };
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hooks: Hooks) {
        self.bundles.push(hooks);
    }

    pub fn on_start(&self, total: usize, pending: usize) {
        dispatch!(self, "onStart", on_start, total, pending);
    }

    pub fn on_before_backup(&self) {
        dispatch!(self, "onBeforeBackup", on_before_backup);
    }

    pub fn on_after_backup(&self, path: &str) {
        dispatch!(self, "onAfterBackup", on_after_backup, path);
    }

    pub fn on_before_migrate(&self, script: &MigrationScript) {
        dispatch!(self, "onBeforeMigrate", on_before_migrate, script);
    }

    pub fn on_after_migrate(&self, script: &MigrationScript, info: &MigrationInfo) {
        dispatch!(self, "onAfterMigrate", on_after_migrate, script, info);
    }

    pub fn on_migration_error(&self, script: &MigrationScript, error: &CoreError) {
        dispatch!(self, "onMigrationError", on_migration_error, script, error);
    }

    pub fn on_before_restore(&self, path: &str) {
        dispatch!(self, "onBeforeRestore", on_before_restore, path);
    }

    pub fn on_after_restore(&self, path: &str) {
        dispatch!(self, "onAfterRestore", on_after_restore, path);
    }

    pub fn on_complete(&self, result: &MigrationResult) {
        dispatch!(self, "onComplete", on_complete, result);
    }

    pub fn on_error(&self, error: &CoreError) {
        dispatch!(self, "onError", on_error, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn calls_every_registered_bundle_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = HookDispatcher::new();

        let first = calls.clone();
        dispatcher.register(Hooks {
            on_start: Some(Box::new(move |_, _| {
                assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
                Ok(())
            })),
            ..Hooks::default()
        });

        let second = calls.clone();
        dispatcher.register(Hooks {
            on_start: Some(Box::new(move |_, _| {
                assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
                Ok(())
            })),
            ..Hooks::default()
        });

        dispatcher.on_start(10, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn an_absent_hook_is_silently_skipped() {
        let dispatcher = HookDispatcher::new();
        dispatcher.on_start(10, 3);
        dispatcher.on_before_backup();
        dispatcher.on_after_backup("path");
    }

    #[test]
    fn a_failing_hook_does_not_propagate() {
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(Hooks {
            on_before_backup: Some(Box::new(|| Err(CoreError::Other("boom".into())))),
            ..Hooks::default()
        });
        dispatcher.on_before_backup();
    }
}
