//! Scanner (§4.2): discovers migration files and classifies them against
//! the ledger's high-water mark.

use regex::Regex;
use std::path::Path;

use crate::error::CoreError;
use crate::ledger::MigrationInfo;
use crate::loader::LoaderRegistry;
use crate::script::MigrationScript;

/// An ordered filename pattern: the first capturing group that matches
/// yields the migration's timestamp.
pub struct FilePattern(Regex);

impl FilePattern {
    pub fn new(regex: Regex) -> Self {
        Self(regex)
    }

    fn extract_timestamp(&self, filename: &str) -> Option<i64> {
        self.0
            .captures(filename)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
    }
}

/// Default filename convention: `{timestamp}_{name}.{ext}`, e.g.
/// `20240120120000_create_users.up.sql`.
pub fn default_file_patterns() -> Vec<FilePattern> {
    vec![FilePattern::new(
        Regex::new(r"^(\d+)_.+$").expect("static pattern is valid"),
    )]
}

/// The Scanner's output (§3).
#[derive(Debug, Default)]
pub struct ScanResult {
    pub all: Vec<MigrationScript>,
    pub migrated: Vec<MigrationScript>,
    pub pending: Vec<MigrationScript>,
    pub ignored: Vec<MigrationScript>,
}

impl ScanResult {
    pub fn high_water_mark(ledger: &[MigrationInfo]) -> i64 {
        ledger.iter().map(|m| m.timestamp).max().unwrap_or(i64::MIN)
    }
}

fn enumerate_files(dir: &Path, recursive: bool) -> Result<Vec<std::path::PathBuf>, CoreError> {
    let mut out = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CoreError::Other(format!("failed to read migration folder {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::Other(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                out.extend(enumerate_files(&path, recursive)?);
            }
            continue;
        }
        out.push(path);
    }
    Ok(out)
}

/// Walks `folder`, classifies every file the loader registry can handle,
/// and partitions it against `ledger` using the high-water-mark rule.
pub fn scan(
    folder: &Path,
    recursive: bool,
    patterns: &[FilePattern],
    registry: &LoaderRegistry,
    ledger: &[MigrationInfo],
) -> Result<ScanResult, CoreError> {
    let ledger_timestamps: std::collections::HashSet<i64> = ledger.iter().map(|m| m.timestamp).collect();
    let high_water_mark = ScanResult::high_water_mark(ledger);

    let mut candidates = Vec::new();
    for path in enumerate_files(folder, recursive)? {
        if registry.find_loader(&path).is_none() {
            continue;
        }
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        let timestamp = patterns.iter().find_map(|p| p.extract_timestamp(filename));
        match timestamp {
            Some(ts) => candidates.push((ts, filename.to_string(), path.clone())),
            None => {
                log::warn!("skipping migration file with no matching pattern: {filename}");
            }
        }
    }

    candidates.sort_by_key(|(ts, _, _)| *ts);

    let mut seen = std::collections::HashSet::new();
    for (ts, _, _) in &candidates {
        if !seen.insert(*ts) {
            return Err(CoreError::DuplicateTimestamp(*ts));
        }
    }

    let mut result = ScanResult::default();
    for (ts, name, path) in candidates {
        let content_hash = crate::checksum::calculate_checksum(&path).ok();
        let script = MigrationScript::new(ts, name, path, content_hash);

        if ledger_timestamps.contains(&ts) {
            result.migrated.push(script.clone());
        } else if ts > high_water_mark {
            result.pending.push(script.clone());
        } else {
            result.ignored.push(script.clone());
        }
        result.all.push(script);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoaderRegistry;

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn classifies_pending_migrated_and_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_first.up.sql", "create table a (id int);");
        write(dir.path(), "2_second.up.sql", "create table b (id int);");
        write(dir.path(), "3_third.up.sql", "create table c (id int);");

        let ledger = vec![MigrationInfo {
            timestamp: 2,
            name: "2_second.up.sql".into(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            username: "tester".into(),
            result: String::new(),
            content_hash: None,
        }];

        let registry = LoaderRegistry::with_defaults();
        let patterns = default_file_patterns();
        let result = scan(dir.path(), false, &patterns, &registry, &ledger).unwrap();

        assert_eq!(result.migrated.len(), 1);
        assert_eq!(result.migrated[0].timestamp, 2);
        // high water mark is 2, so 1 is stale/ignored and 3 is pending.
        assert_eq!(result.pending.len(), 1);
        assert_eq!(result.pending[0].timestamp, 3);
        assert_eq!(result.ignored.len(), 1);
        assert_eq!(result.ignored[0].timestamp, 1);
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_first.up.sql", "create table a (id int);");
        write(dir.path(), "1_other.up.sql", "create table b (id int);");

        let registry = LoaderRegistry::with_defaults();
        let patterns = default_file_patterns();
        let err = scan(dir.path(), false, &patterns, &registry, &[]);
        assert!(matches!(err, Err(CoreError::DuplicateTimestamp(1))));
    }

    #[test]
    fn unrecognized_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "not a migration");
        write(dir.path(), "1_first.up.sql", "create table a (id int);");

        let registry = LoaderRegistry::with_defaults();
        let patterns = default_file_patterns();
        let result = scan(dir.path(), false, &patterns, &registry, &[]).unwrap();
        assert_eq!(result.all.len(), 1);
    }
}
