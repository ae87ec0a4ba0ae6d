//! Configuration surface (§6) and its load waterfall: constructor overrides
//! > environment variables (prefix `MSR_`, `__`-separated sections) > an
//! optional `msr.config.{toml,json,yaml}` file > defaults.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoreError;
use crate::lock::LockConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionMode {
    None,
    PerMigration,
    PerBatch,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionMode::None => "NONE",
            TransactionMode::PerMigration => "PER_MIGRATION",
            TransactionMode::PerBatch => "PER_BATCH",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Isolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for Isolation {
    fn default() -> Self {
        Isolation::ReadCommitted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollbackStrategy {
    Backup,
    Down,
    Both,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupMode {
    Full,
    CreateOnly,
    RestoreOnly,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub max_files: u32,
    pub timestamp_format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            max_files: 5,
            timestamp_format: "%Y-%m-%dT%H:%M:%S%.3fZ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub folder: PathBuf,
    pub prefix: String,
    pub suffix: String,
    pub extension: String,
    pub timestamp: bool,
    pub timestamp_format: String,
    pub delete_backup: bool,
    pub existing_backup_path: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("backups"),
            prefix: "backup".to_string(),
            suffix: String::new(),
            extension: "bak".to_string(),
            timestamp: true,
            timestamp_format: "%Y%m%d%H%M%S".to_string(),
            delete_backup: true,
            existing_backup_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub mode: TransactionMode,
    pub isolation: Isolation,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub retries: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    pub retry_backoff: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            mode: TransactionMode::PerMigration,
            isolation: Isolation::ReadCommitted,
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_millis(200),
            retry_backoff: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingSettings {
    pub enabled: bool,
    pub table_name: String,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
}

impl Default for LockingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            table_name: "migration_lock".to_string(),
            timeout: Duration::from_secs(60),
            retry_attempts: 10,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl LockingSettings {
    pub fn into_lock_config(self) -> Result<LockConfig, CoreError> {
        LockConfig::new(self.enabled, self.table_name, self.timeout, self.retry_attempts, self.retry_delay)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// The process-wide settings object (§3, §6), immutable during a single
/// Orchestrator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub folder: PathBuf,
    pub recursive: bool,
    pub table_name: String,
    /// Ordered regex sources for filename timestamp extraction (§6
    /// `filePatterns`); empty means [`crate::scanner::default_file_patterns`]
    /// applies. Held as strings rather than compiled [`regex::Regex`] so
    /// `Configuration` itself stays `Clone`/`Serialize`/`Deserialize`; the
    /// Orchestrator compiles them once per call.
    pub file_pattern_sources: Vec<String>,
    pub before_migrate_name: String,
    pub dry_run: bool,
    pub display_limit: usize,
    pub validate_before_run: bool,
    pub validate_migrated_files: bool,
    pub strict_validation: bool,
    pub log_level: LogLevel,
    pub logging: LoggingConfig,
    pub backup: BackupConfig,
    pub rollback_strategy: RollbackStrategy,
    pub backup_mode: BackupMode,
    pub transaction: TransactionConfig,
    pub locking: LockingSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("migrations"),
            recursive: false,
            table_name: "schema_version".to_string(),
            file_pattern_sources: Vec::new(),
            before_migrate_name: "before-migrate".to_string(),
            dry_run: false,
            display_limit: 20,
            validate_before_run: true,
            validate_migrated_files: false,
            strict_validation: false,
            log_level: LogLevel::Info,
            logging: LoggingConfig::default(),
            backup: BackupConfig::default(),
            rollback_strategy: RollbackStrategy::Backup,
            backup_mode: BackupMode::Full,
            transaction: TransactionConfig::default(),
            locking: LockingSettings::default(),
        }
    }
}

const ENV_PREFIX: &str = "MSR";
const ENV_SEPARATOR: &str = "__";

impl Configuration {
    /// Builds the waterfall on the `config` crate: an optional
    /// `msr.config.{toml,json,yaml}` file (or an explicit `config_file`)
    /// overlaid by `MSR_`-prefixed environment variables, sections nested
    /// with a `__` separator (e.g. `MSR_LOCKING__TIMEOUT`). Fields absent
    /// from both fall back to [`Configuration::default`] via each struct's
    /// container-level `#[serde(default)]`. Constructor overrides are
    /// whatever the caller mutates on the result afterwards, per the
    /// documented precedence.
    pub fn load(config_file: Option<&Path>) -> Result<Self, CoreError> {
        let mut builder = Config::builder();

        let explicit_path = config_file.map(PathBuf::from).or_else(|| std::env::var("MSR_CONFIG_FILE").ok().map(PathBuf::from));
        builder = match explicit_path {
            Some(path) => builder.add_source(File::from(path).required(false)),
            None => builder.add_source(File::with_name("msr.config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .list_separator(",")
                .with_list_parse_key("file_pattern_sources"),
        );

        let built =
            builder.build().map_err(|e| CoreError::Other(format!("failed to load configuration: {e}")))?;

        built.try_deserialize::<Configuration>().map_err(|e| CoreError::Other(format!("invalid configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serializes env-touching tests against each other (process env is
    /// global) and restores the prior state on drop.
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        keys: Vec<&'static str>,
    }

    impl<'a> EnvGuard<'a> {
        fn set(pairs: &[(&'static str, &str)]) -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut keys = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                std::env::set_var(k, v);
                keys.push(*k);
            }
            Self { _lock: lock, keys }
        }
    }

    impl<'a> Drop for EnvGuard<'a> {
        fn drop(&mut self) {
            for k in &self.keys {
                std::env::remove_var(k);
            }
        }
    }

    #[test]
    fn defaults_with_empty_env() {
        let _guard = EnvGuard::set(&[]);
        let config = Configuration::load(None).unwrap();
        assert_eq!(config.table_name, "schema_version");
        assert_eq!(config.transaction.mode, TransactionMode::PerMigration);
        assert!(!config.dry_run);
    }

    #[test]
    fn env_overrides_defaults() {
        let _guard = EnvGuard::set(&[("MSR_DRY_RUN", "true"), ("MSR_TABLE_NAME", "custom_table")]);
        let config = Configuration::load(None).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.table_name, "custom_table");
    }

    #[test]
    fn env_overrides_reach_nested_sections() {
        let _guard = EnvGuard::set(&[
            ("MSR_LOCKING__ENABLED", "false"),
            ("MSR_LOCKING__TIMEOUT", "1500"),
            ("MSR_TRANSACTION__MODE", "PER_BATCH"),
            ("MSR_BACKUP__PREFIX", "nightly"),
            ("MSR_LOGGING__ENABLED", "true"),
        ]);
        let config = Configuration::load(None).unwrap();
        assert!(!config.locking.enabled);
        assert_eq!(config.locking.timeout, Duration::from_millis(1500));
        assert_eq!(config.transaction.mode, TransactionMode::PerBatch);
        assert_eq!(config.backup.prefix, "nightly");
        assert!(config.logging.enabled);
    }

    #[test]
    fn env_overrides_reach_every_documented_top_level_key() {
        let _guard = EnvGuard::set(&[
            ("MSR_ROLLBACK_STRATEGY", "DOWN"),
            ("MSR_BACKUP_MODE", "MANUAL"),
            ("MSR_DISPLAY_LIMIT", "5"),
            ("MSR_VALIDATE_BEFORE_RUN", "false"),
            ("MSR_VALIDATE_MIGRATED_FILES", "true"),
            ("MSR_STRICT_VALIDATION", "true"),
        ]);
        let config = Configuration::load(None).unwrap();
        assert_eq!(config.rollback_strategy, RollbackStrategy::Down);
        assert_eq!(config.backup_mode, BackupMode::Manual);
        assert_eq!(config.display_limit, 5);
        assert!(!config.validate_before_run);
        assert!(config.validate_migrated_files);
        assert!(config.strict_validation);
    }

    #[test]
    fn file_patterns_env_override_parses_a_comma_separated_list() {
        let _guard = EnvGuard::set(&[("MSR_FILE_PATTERN_SOURCES", r"^v(\d+)__.+$,^w(\d+)__.+$")]);
        let config = Configuration::load(None).unwrap();
        assert_eq!(config.file_pattern_sources, vec!["^v(\\d+)__.+$".to_string(), "^w(\\d+)__.+$".to_string()]);
    }

    #[test]
    fn msr_config_file_env_var_points_at_an_explicit_file_when_none_is_passed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "table_name = \"from_env_path\"\n").unwrap();

        let _guard = EnvGuard::set(&[("MSR_CONFIG_FILE", path.to_str().unwrap())]);
        let config = Configuration::load(None).unwrap();
        assert_eq!(config.table_name, "from_env_path");
    }

    #[test]
    fn file_patterns_from_config_file_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "file_pattern_sources = [\"^(\\\\d+)_.+$\"]\n").unwrap();

        let _guard = EnvGuard::set(&[]);
        let config = Configuration::load(Some(&path)).unwrap();
        assert_eq!(config.file_pattern_sources, vec!["^(\\d+)_.+$".to_string()]);
    }

    #[test]
    fn transaction_mode_display_matches_wire_format() {
        assert_eq!(TransactionMode::None.to_string(), "NONE");
        assert_eq!(TransactionMode::PerMigration.to_string(), "PER_MIGRATION");
        assert_eq!(TransactionMode::PerBatch.to_string(), "PER_BATCH");
    }

    #[test]
    fn file_overrides_defaults_then_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "table_name = \"from_file\"\ndry_run = true\n").unwrap();

        let _guard = EnvGuard::set(&[("MSR_TABLE_NAME", "from_env")]);
        let config = Configuration::load(Some(&path)).unwrap();

        assert_eq!(config.table_name, "from_env");
        assert!(config.dry_run);
    }
}
