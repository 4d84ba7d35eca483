//! On-disk store of generated migrations.

use super::unit::{MigrationSource, MigrationUnit, SqlMigration};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// File suffix of stored migrations.
pub const MIGRATION_FILE_SUFFIX: &str = ".migration.json";

/// Stores each [`SqlMigration`] as `<dir>/<name>.migration.json`.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, MIGRATION_FILE_SUFFIX))
    }

    /// Write one migration, creating the directory if needed.
    pub fn save(&self, migration: &SqlMigration) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&migration.name);
        let json = serde_json::to_string_pretty(migration)?;
        std::fs::write(&path, json)?;
        tracing::debug!(migration = %migration.name, path = %path.display(), "stored migration");
        Ok(path)
    }

    pub fn save_all(&self, migrations: &[SqlMigration]) -> Result<Vec<PathBuf>> {
        migrations.iter().map(|m| self.save(m)).collect()
    }

    /// Load a migration by name, `None` if it was never stored.
    pub fn load(&self, name: &str) -> Result<Option<SqlMigration>> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Every stored migration, ordered by file name.
    pub fn list(&self) -> Result<Vec<SqlMigration>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut migrations = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            let stored = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(MIGRATION_FILE_SUFFIX));
            if stored {
                let json = std::fs::read_to_string(entry.path())?;
                migrations.push(serde_json::from_str(&json)?);
            }
        }
        Ok(migrations)
    }
}

impl MigrationSource for MigrationStore {
    fn resolve(&self, name: &str) -> Result<Option<Arc<dyn MigrationUnit>>> {
        Ok(self
            .load(name)?
            .map(|m| Arc::new(m) as Arc<dyn MigrationUnit>))
    }
}
