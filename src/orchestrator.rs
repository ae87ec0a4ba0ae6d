//! The Orchestrator: the state machine described in §4.1, wiring every
//! other component together behind `migrate_up`, `down_to`, `validate`, and
//! `list`.

use std::any::Any;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;

use crate::backup::BackupService;
use crate::checksum::calculate_checksum;
use crate::config::{BackupMode, Configuration, RollbackStrategy};
use crate::error::CoreError;
use crate::executor::Executor;
use crate::hooks::{HookDispatcher, Hooks};
use crate::interfaces::{BackupDriver, DbHandle, LockDriver, SchemaVersionDriver};
use crate::ledger::{MigrationInfo, SchemaVersionService};
use crate::loader::{CodeMigrationLoader, LoaderRegistry, Runnable, SqlMigrationLoader};
use crate::lock::{generate_owner_id, LockConfig, LockGuard, LockService};
use crate::result::MigrationResult;
use crate::rollback::RollbackCoordinator;
use crate::scanner::{default_file_patterns, scan, FilePattern, ScanResult};
use crate::script::MigrationScript;
use crate::validator::Validator;

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

pub struct Orchestrator {
    db: Arc<dyn DbHandle>,
    schema_version: SchemaVersionService,
    lock_service: LockService,
    backup_service: BackupService,
    registry: LoaderRegistry,
    code_loader: Arc<CodeMigrationLoader>,
    config: Configuration,
    hooks: HookDispatcher,
    handler: Box<dyn Any + Send + Sync>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn DbHandle>,
        schema_driver: Arc<dyn SchemaVersionDriver>,
        lock_driver: Arc<dyn LockDriver>,
        backup_driver: Arc<dyn BackupDriver>,
        config: Configuration,
    ) -> Result<Self, CoreError> {
        let lock_config: LockConfig = config.locking.clone().into_lock_config()?;

        let code_loader = Arc::new(CodeMigrationLoader::new());
        let mut registry = LoaderRegistry::new();
        registry.register(Box::new(SqlMigrationLoader::new()));
        registry.register(Box::new(Arc::clone(&code_loader)));

        Ok(Self {
            db,
            schema_version: SchemaVersionService::new(schema_driver),
            lock_service: LockService::new(lock_driver, lock_config),
            backup_service: BackupService::new(backup_driver),
            registry,
            code_loader,
            config,
            hooks: HookDispatcher::new(),
            handler: Box::new(()),
        })
    }

    /// The registry callers use to supply code-based migration runnables
    /// (Rust cannot dynamically import a source file by path — §9).
    pub fn code_loader(&self) -> &Arc<CodeMigrationLoader> {
        &self.code_loader
    }

    pub fn register_hooks(&mut self, hooks: Hooks) {
        self.hooks.register(hooks);
    }

    /// Opaque object made available to every `Runnable` through
    /// [`crate::loader::ExecutionContext::handler`].
    pub fn with_handler(mut self, handler: Box<dyn Any + Send + Sync>) -> Self {
        self.handler = handler;
        self
    }

    fn file_patterns(&self) -> Result<Vec<FilePattern>, CoreError> {
        if self.config.file_pattern_sources.is_empty() {
            return Ok(default_file_patterns());
        }
        self.config
            .file_pattern_sources
            .iter()
            .map(|src| {
                Regex::new(src)
                    .map(FilePattern::new)
                    .map_err(|e| CoreError::Other(format!("invalid file pattern '{src}': {e}")))
            })
            .collect()
    }

    fn find_before_migrate(&self) -> Option<MigrationScript> {
        if self.config.before_migrate_name.trim().is_empty() {
            return None;
        }
        let path = self.config.folder.join(format!("{}.up.sql", self.config.before_migrate_name));
        if !path.is_file() {
            return None;
        }
        let hash = calculate_checksum(&path).ok();
        Some(MigrationScript::new(i64::MIN, self.config.before_migrate_name.clone(), path, hash))
    }

    /// Connection check, lock acquisition, and result dispatch. The actual
    /// migrate-up work happens in [`Self::run_migrate_up_locked`] once the
    /// lock is held.
    ///
    /// `target`: advance to the latest pending script when `None`, or up to
    /// and including `target` when `Some` (§4.1 `migrate-up(targetTimestamp?)`).
    /// Pending scripts whose timestamp is past `target` are left untouched —
    /// they remain pending for a later call.
    pub fn migrate_up(&self, target: Option<i64>) -> Result<MigrationResult, CoreError> {
        if !self.db.check_connection() {
            return Err(CoreError::ConnectionCheckFailed);
        }

        let owner_id = generate_owner_id();
        let _guard = if self.config.locking.enabled {
            Some(LockGuard::acquire(&self.lock_service, owner_id)?)
        } else {
            None
        };

        let outcome = self.run_migrate_up_locked(target);
        match &outcome {
            Ok(result) => self.hooks.on_complete(result),
            Err(e) => self.hooks.on_error(e),
        }
        outcome
    }

    fn run_migrate_up_locked(&self, target: Option<i64>) -> Result<MigrationResult, CoreError> {
        self.schema_version.init(&self.config.table_name)?;
        let executed_ledger = self.schema_version.get_all_executed()?;
        let patterns = self.file_patterns()?;
        let scan_result = scan(&self.config.folder, self.config.recursive, &patterns, &self.registry, &executed_ledger)?;

        if self.config.validate_before_run {
            Validator::validate_pre_execution(&scan_result, &self.config, &self.registry, &executed_ledger)?;
        }
        if self.config.validate_migrated_files {
            Validator::validate_integrity(&scan_result, &executed_ledger)?;
        }

        let ignored_names: Vec<String> = scan_result.ignored.iter().map(|s| s.name.clone()).collect();

        // Scripts past `target` stay pending for a later call; only
        // `to_run` is scheduled for this one (§4.1 scenario: ledger=[1,2],
        // files=[1..5], migrate-up(4) => executed=[3,4], 5 stays pending).
        let limit = target.unwrap_or(i64::MAX);
        let to_run: Vec<&MigrationScript> = scan_result.pending.iter().filter(|s| s.timestamp <= limit).collect();

        self.hooks.on_start(scan_result.all.len(), to_run.len());

        if to_run.is_empty() {
            return Ok(MigrationResult {
                success: true,
                migrated: executed_ledger.clone(),
                ignored: ignored_names,
                ..Default::default()
            });
        }

        BackupService::validate_restore_only(self.config.backup_mode, &self.config.backup)?;

        if self.config.dry_run {
            return Ok(MigrationResult {
                success: true,
                migrated: executed_ledger.clone(),
                would_execute: to_run.iter().map(|s| s.name.clone()).collect(),
                ignored: ignored_names,
                ..Default::default()
            });
        }

        // beforeMigrate runs before any backup exists; per §7 its failure is
        // an ordinary execution error that never reaches the Rollback
        // Coordinator ("no backup yet").
        if let Some(before_script) = self.find_before_migrate() {
            if let Err(e) = self.run_before_migrate(&before_script) {
                self.hooks.on_migration_error(&before_script, &e);
                return Ok(MigrationResult {
                    success: false,
                    migrated: executed_ledger.clone(),
                    ignored: ignored_names,
                    errors: vec![e.to_string()],
                    ..Default::default()
                });
            }
        }

        let mut backup_path: Option<String> = None;
        if BackupService::should_create(self.config.backup_mode, self.config.dry_run) {
            self.hooks.on_before_backup();
            let path = self.backup_service.create()?;
            self.hooks.on_after_backup(&path);
            backup_path = Some(path);
        }

        let executor = Executor::new(self.db.as_ref(), &self.config.transaction);
        // Borrowed, not cloned: a clone of `MigrationScript` always starts
        // unloaded (§3 lifecycle), which would strip the in-memory runnable
        // the Rollback Coordinator needs to invoke `down()` on these same
        // scripts. Borrowing from `scan_result.pending` keeps the loaded
        // state alive for the rest of this call.
        let mut executed_this_run: Vec<(&MigrationScript, MigrationInfo)> = Vec::new();

        if let Err(e) = executor.begin_batch() {
            return self.handle_execution_failure(None, e, &scan_result, backup_path.as_deref(), executed_this_run, ignored_names, &executed_ledger);
        }

        for script in to_run.iter().copied() {
            self.hooks.on_before_migrate(script);
            let started_at = Utc::now();
            match self.run_one(script, &executor, &started_at) {
                Ok(info) => {
                    self.hooks.on_after_migrate(script, &info);
                    if let Err(e) = self.schema_version.save(&info) {
                        executor.rollback_batch();
                        return self.handle_execution_failure(
                            Some(script),
                            e,
                            &scan_result,
                            backup_path.as_deref(),
                            executed_this_run,
                            ignored_names,
                            &executed_ledger,
                        );
                    }
                    executed_this_run.push((script, info));
                }
                Err(e) => {
                    self.hooks.on_migration_error(script, &e);
                    executor.rollback_batch();
                    return self.handle_execution_failure(
                        Some(script),
                        e,
                        &scan_result,
                        backup_path.as_deref(),
                        executed_this_run,
                        ignored_names,
                        &executed_ledger,
                    );
                }
            }
        }

        if let Err(e) = executor.commit_batch() {
            return self.handle_execution_failure(None, e, &scan_result, backup_path.as_deref(), executed_this_run, ignored_names, &executed_ledger);
        }

        if backup_path.is_some() && self.config.backup.delete_backup && self.config.backup_mode == BackupMode::Full {
            // Cleanup is best-effort; a failure here does not flip the result to failure.
            log::debug!("migration succeeded; backup retained per driver (no dedicated delete op on BackupDriver)");
        }

        Ok(MigrationResult {
            success: true,
            executed: executed_this_run.into_iter().map(|(_, info)| info).collect(),
            migrated: executed_ledger,
            ignored: ignored_names,
            ..Default::default()
        })
    }

    fn run_before_migrate(&self, script: &MigrationScript) -> Result<(), CoreError> {
        self.registry.load(script)?;
        let info = MigrationInfo {
            timestamp: script.timestamp,
            name: script.name.clone(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            username: current_username(),
            result: String::new(),
            content_hash: script.content_hash.clone(),
        };
        let ctx = crate::loader::ExecutionContext { db: self.db.as_ref(), info: &info, handler: self.handler.as_ref() };
        script
            .with_loaded(|r: &dyn Runnable| r.up(&ctx))
            .expect("registry.load populated this script")
            .map(|_| ())
            .map_err(|e| CoreError::BeforeMigrateFailed(e.to_string()))
    }

    fn run_one(&self, script: &MigrationScript, executor: &Executor<'_>, started_at: &chrono::DateTime<Utc>) -> Result<MigrationInfo, CoreError> {
        let info = MigrationInfo {
            timestamp: script.timestamp,
            name: script.name.clone(),
            started_at: *started_at,
            finished_at: *started_at,
            username: current_username(),
            result: String::new(),
            content_hash: script.content_hash.clone(),
        };
        let text = executor.execute_one(script, &info, self.handler.as_ref(), &self.registry)?;
        Ok(MigrationInfo { finished_at: Utc::now(), result: text, ..info })
    }

    fn handle_execution_failure(
        &self,
        failed: Option<&MigrationScript>,
        err: CoreError,
        scan_result: &ScanResult,
        backup_path: Option<&str>,
        executed_this_run: Vec<(&MigrationScript, MigrationInfo)>,
        ignored_names: Vec<String>,
        executed_ledger: &[MigrationInfo],
    ) -> Result<MigrationResult, CoreError> {
        let restore_source = BackupService::restore_source(self.config.backup_mode, &self.config.backup, backup_path);
        let coordinator = RollbackCoordinator::new(self.db.as_ref(), &self.schema_version, &self.backup_service, self.handler.as_ref());

        let mut errors = vec![err.to_string()];
        let mut rolled_back = Vec::new();

        if let Some(failed_script) = failed {
            let wants_restore_hook = matches!(self.config.rollback_strategy, RollbackStrategy::Backup | RollbackStrategy::Both);
            if wants_restore_hook {
                if let Some(path) = restore_source.as_deref() {
                    self.hooks.on_before_restore(path);
                }
            }

            match coordinator.rollback(self.config.rollback_strategy, failed_script, &executed_this_run, restore_source.as_deref()) {
                Ok(undone) => {
                    rolled_back = undone;
                    if wants_restore_hook {
                        if let Some(path) = restore_source.as_deref() {
                            self.hooks.on_after_restore(path);
                        }
                    }
                }
                Err(rollback_err) => {
                    log::error!("rollback did not fully succeed: {rollback_err}");
                    errors.push(format!("rollback error: {rollback_err}"));
                }
            }
        } else if self.config.rollback_strategy != RollbackStrategy::None {
            // A failure with no single offending script (batch commit/begin
            // failure) still honors BACKUP-based strategies.
            if matches!(self.config.rollback_strategy, RollbackStrategy::Backup | RollbackStrategy::Both) {
                if let Some(path) = restore_source.as_deref() {
                    self.hooks.on_before_restore(path);
                    if let Err(e) = self.backup_service.restore(path) {
                        errors.push(format!("rollback error: {e}"));
                    } else {
                        self.hooks.on_after_restore(path);
                    }
                }
            }
        }

        Ok(MigrationResult {
            success: false,
            executed: executed_this_run.into_iter().map(|(_, info)| info).collect(),
            migrated: executed_ledger.to_vec(),
            rolled_back,
            ignored: ignored_names,
            errors,
            ..Default::default()
        })
    }

    /// Reverses applied migrations down to (but not including) `target`, in
    /// strictly descending timestamp order. Stops at the first failure,
    /// leaving a deterministic prefix undone.
    pub fn down_to(&self, target: i64) -> Result<MigrationResult, CoreError> {
        if !self.db.check_connection() {
            return Err(CoreError::ConnectionCheckFailed);
        }

        let owner_id = generate_owner_id();
        let _guard = if self.config.locking.enabled {
            Some(LockGuard::acquire(&self.lock_service, owner_id)?)
        } else {
            None
        };

        self.schema_version.init(&self.config.table_name)?;
        let executed_ledger = self.schema_version.get_all_executed()?;
        let patterns = self.file_patterns()?;
        let scan_result = scan(&self.config.folder, self.config.recursive, &patterns, &self.registry, &executed_ledger)?;

        let mut to_undo: Vec<&MigrationInfo> = executed_ledger.iter().filter(|m| m.timestamp > target).collect();
        to_undo.sort_by_key(|m| std::cmp::Reverse(m.timestamp));

        let mut undone_names = Vec::new();
        for info in to_undo {
            let Some(script) = scan_result.all.iter().find(|s| s.timestamp == info.timestamp) else {
                let err = CoreError::RollbackIncomplete {
                    script: info.name.clone(),
                    reason: "migration file no longer present on disk".into(),
                };
                self.hooks.on_error(&err);
                return Err(err);
            };

            if let Err(e) = self.registry.load(script) {
                self.hooks.on_error(&e);
                return Err(e);
            }

            let synthetic = MigrationInfo {
                timestamp: script.timestamp,
                name: script.name.clone(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                username: current_username(),
                result: String::new(),
                content_hash: script.content_hash.clone(),
            };
            let ctx = crate::loader::ExecutionContext { db: self.db.as_ref(), info: &synthetic, handler: self.handler.as_ref() };

            let down_result = script.with_loaded(|r: &dyn Runnable| r.down(&ctx)).expect("loaded above");
            match down_result {
                Ok(_) => {
                    if let Err(e) = self.schema_version.remove(script.timestamp) {
                        self.hooks.on_error(&e);
                        return Err(e);
                    }
                    undone_names.push(script.name.clone());
                }
                Err(e) => {
                    self.hooks.on_error(&e);
                    return Err(e);
                }
            }
        }

        let remaining: Vec<MigrationInfo> = executed_ledger.into_iter().filter(|m| m.timestamp <= target).collect();
        Ok(MigrationResult { success: true, migrated: remaining, rolled_back: undone_names, ..Default::default() })
    }

    /// Read-only: discovers and classifies scripts without taking the lock.
    ///
    /// `limit`: caps how many rows of each subset (`all`/`migrated`/
    /// `pending`/`ignored`) are reported, keeping the most recent
    /// (highest-timestamp) entries, per §6 `displayLimit`. Defaults to
    /// `config.display_limit` when `None`.
    pub fn list(&self, limit: Option<usize>) -> Result<ScanResult, CoreError> {
        if !self.db.check_connection() {
            return Err(CoreError::ConnectionCheckFailed);
        }
        let executed_ledger = self.schema_version.get_all_executed()?;
        let patterns = self.file_patterns()?;
        let scan_result = scan(&self.config.folder, self.config.recursive, &patterns, &self.registry, &executed_ledger)?;
        Ok(Self::truncate_scan_result(scan_result, limit.unwrap_or(self.config.display_limit)))
    }

    /// Keeps the last `limit` entries of each subset (ascending-timestamp
    /// order means "last" is "most recent").
    fn truncate_scan_result(mut scan_result: ScanResult, limit: usize) -> ScanResult {
        fn truncate(scripts: &mut Vec<MigrationScript>, limit: usize) {
            if scripts.len() > limit {
                let drop = scripts.len() - limit;
                scripts.drain(0..drop);
            }
        }
        truncate(&mut scan_result.all, limit);
        truncate(&mut scan_result.migrated, limit);
        truncate(&mut scan_result.pending, limit);
        truncate(&mut scan_result.ignored, limit);
        scan_result
    }

    /// Read-only: runs both validation passes without taking the lock or
    /// mutating any state.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.db.check_connection() {
            return Err(CoreError::ConnectionCheckFailed);
        }
        let executed_ledger = self.schema_version.get_all_executed()?;
        let patterns = self.file_patterns()?;
        let scan_result = scan(&self.config.folder, self.config.recursive, &patterns, &self.registry, &executed_ledger)?;

        Validator::validate_pre_execution(&scan_result, &self.config, &self.registry, &executed_ledger)?;
        Validator::validate_integrity(&scan_result, &executed_ledger)?;
        Ok(())
    }
}
