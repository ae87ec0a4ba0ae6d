//! The SQL loader (§4.3): `*.up.sql` / `*.down.sql` pairs executed verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use super::{ExecutionContext, MigrationLoader, Runnable};
use crate::error::CoreError;
use crate::script::MigrationScript;

const PREVIEW_LEN: usize = 80;

fn preview(sql: &str) -> String {
    if sql.chars().count() <= PREVIEW_LEN {
        sql.to_string()
    } else {
        let truncated: String = sql.chars().take(PREVIEW_LEN).collect();
        format!("{truncated}...")
    }
}

fn read_trimmed(path: &Path) -> Result<String, CoreError> {
    let raw = fs::read_to_string(path).map_err(|e| CoreError::SqlFileError {
        file: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let trimmed = raw.trim().to_string();
    if trimmed.is_empty() {
        return Err(CoreError::SqlFileError {
            file: path.display().to_string(),
            reason: "file is empty after trimming".to_string(),
        });
    }
    Ok(trimmed)
}

fn down_path_for(up_path: &Path) -> PathBuf {
    let file_name = up_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let down_name = file_name.replacen(".up.sql", ".down.sql", 1);
    up_path.with_file_name(down_name)
}

pub struct SqlMigrationLoader;

impl SqlMigrationLoader {
    pub const NAME: &'static str = "sql";

    pub fn new() -> Self {
        Self
    }
}

impl Default for SqlMigrationLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationLoader for SqlMigrationLoader {
    fn get_name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".up.sql"))
            .unwrap_or(false)
    }

    fn load(&self, script: &MigrationScript) -> Result<Box<dyn Runnable>, CoreError> {
        Ok(Box::new(SqlRunnable {
            up_path: script.filepath.clone(),
        }))
    }
}

struct SqlRunnable {
    up_path: PathBuf,
}

impl Runnable for SqlRunnable {
    fn up(&self, ctx: &ExecutionContext<'_>) -> Result<String, CoreError> {
        let sql = read_trimmed(&self.up_path)?;
        ctx.db.query(&sql).map_err(|e| CoreError::ExecutionFailed {
            script: ctx.info.name.clone(),
            direction: "up",
            preview: preview(&sql),
            reason: e.to_string(),
        })?;
        Ok(format!("executed {}", self.up_path.display()))
    }

    fn down(&self, ctx: &ExecutionContext<'_>) -> Result<String, CoreError> {
        let down_path = down_path_for(&self.up_path);
        if !down_path.exists() {
            return Err(CoreError::SqlFileError {
                file: down_path.display().to_string(),
                reason: "down script not found".to_string(),
            });
        }
        let sql = read_trimmed(&down_path)?;
        ctx.db.query(&sql).map_err(|e| CoreError::ExecutionFailed {
            script: ctx.info.name.clone(),
            direction: "down",
            preview: preview(&sql),
            reason: e.to_string(),
        })?;
        Ok(format!("executed {}", down_path.display()))
    }

    fn has_down(&self) -> bool {
        down_path_for(&self.up_path).exists()
    }
}
