//! Migration manager: applies units once, records them in the ledger and
//! rolls back whole batches.

use super::ddl::UPDATED_AT_FUNCTION;
use super::unit::{MigrationKind, MigrationSource, MigrationUnit};
use crate::connection::{self, Connection};
use crate::error::{Error, Result};
use crate::value::Value;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "migrations";

const CREATE_EXTENSION: &str = r#"CREATE EXTENSION IF NOT EXISTS "uuid-ossp""#;
const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS migrations (\
id SERIAL PRIMARY KEY, \
name VARCHAR(255) NOT NULL UNIQUE, \
batch INTEGER NOT NULL, \
executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)";
const SELECT_NAMES: &str = "SELECT name FROM migrations";
const NEXT_BATCH: &str = "SELECT COALESCE(MAX(batch), 0) + 1 AS next_batch FROM migrations";
const RECORD: &str = "INSERT INTO migrations (name, batch) VALUES ($1, $2)";
const REMOVE: &str = "DELETE FROM migrations WHERE name = $1";
const LAST_BATCHES: &str = "SELECT DISTINCT batch FROM migrations ORDER BY batch DESC LIMIT $1";
const BATCH_CONTENTS: &str = "SELECT * FROM migrations WHERE batch = $1 ORDER BY id";
const STATUS: &str = "SELECT name, batch, executed_at FROM migrations ORDER BY id";

/// Outcome of [`MigrationManager::migrate_with_migrations`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Batch the applied units were recorded under; `None` when nothing ran.
    pub batch: Option<i64>,
    /// Names applied, in execution order.
    pub applied: Vec<String>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Outcome of [`MigrationManager::rollback`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Batches reverted, most recent first.
    pub batches: Vec<i64>,
    /// Names reverted, in execution order.
    pub rolled_back: Vec<String>,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub name: String,
    pub batch: i64,
    pub executed_at: Option<DateTime<Utc>>,
}

/// Applies migration units exactly once and reverts them by batch.
///
/// Units this manager applied are remembered for rollback; older ledger
/// entries are resolved through the configured [`MigrationSource`].
pub struct MigrationManager {
    conn: Arc<dyn Connection>,
    source: Option<Arc<dyn MigrationSource>>,
    applied: Mutex<HashMap<String, Arc<dyn MigrationUnit>>>,
}

impl MigrationManager {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            source: None,
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// Set the source used to resolve ledger entries during rollback.
    pub fn with_source(mut self, source: Arc<dyn MigrationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Ensure the `uuid-ossp` extension, the ledger table and the
    /// `updated_at` trigger function exist.
    pub async fn initialize(&self) -> Result<()> {
        self.conn.execute(CREATE_EXTENSION, &[]).await?;
        self.conn.execute(CREATE_LEDGER, &[]).await?;
        self.conn.execute(UPDATED_AT_FUNCTION, &[]).await?;
        Ok(())
    }

    /// Names already recorded in the ledger.
    pub async fn applied_names(&self) -> Result<HashSet<String>> {
        let rows = self.conn.fetch_all(SELECT_NAMES, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// The batch number the next run will record under.
    pub async fn next_batch(&self) -> Result<i64> {
        let row = self.conn.fetch_optional(NEXT_BATCH, &[]).await?;
        Ok(row
            .as_ref()
            .and_then(|row| row.get("next_batch"))
            .and_then(Value::as_i64)
            .unwrap_or(1))
    }

    /// Apply every unit not yet in the ledger.
    ///
    /// Primary units run in one transaction and join units in a second one.
    /// A failure rolls back only the transaction it happened in; primaries
    /// committed before a failing join phase stay applied.
    pub async fn migrate_with_migrations(
        &self,
        units: Vec<Arc<dyn MigrationUnit>>,
    ) -> Result<MigrationReport> {
        self.initialize().await?;
        if units.is_empty() {
            info!("no migrations to run");
            return Ok(MigrationReport::default());
        }

        let applied = self.applied_names().await?;
        let (pending, skipped): (Vec<_>, Vec<_>) = units
            .into_iter()
            .partition(|unit| !applied.contains(unit.name()));
        for unit in &skipped {
            info!(migration = %unit.name(), "already applied, skipping");
        }
        if pending.is_empty() {
            return Ok(MigrationReport::default());
        }

        let batch = self.next_batch().await?;
        let (primaries, joins): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|unit| unit.kind() == MigrationKind::Primary);

        let mut report = MigrationReport {
            batch: Some(batch),
            applied: Vec::new(),
        };
        for phase in [primaries, joins] {
            if phase.is_empty() {
                continue;
            }
            let names =
                connection::transaction(self.conn.as_ref(), self.apply(&phase, batch)).await?;
            let mut cache = self.applied.lock();
            for unit in phase {
                cache.insert(unit.name().to_string(), unit);
            }
            report.applied.extend(names);
        }

        info!(batch, count = report.applied.len(), "migrations applied");
        Ok(report)
    }

    async fn apply(&self, units: &[Arc<dyn MigrationUnit>], batch: i64) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(units.len());
        for unit in units {
            let name = unit.name();
            info!(migration = %name, kind = %unit.kind(), batch, "applying migration");
            if let Err(err) = unit.up(self.conn.as_ref()).await {
                error!(migration = %name, error = %err, "migration failed");
                return Err(Error::execution(name, err));
            }
            self.conn
                .execute(RECORD, &[Value::from(name), Value::Int(batch)])
                .await?;
            names.push(name.to_string());
        }
        Ok(names)
    }

    /// Revert the `steps` most recent batches inside a single transaction.
    pub async fn rollback(&self, steps: u32) -> Result<RollbackReport> {
        if steps == 0 {
            return Ok(RollbackReport::default());
        }

        self.initialize().await?;
        let rows = self
            .conn
            .fetch_all(LAST_BATCHES, &[Value::Int(i64::from(steps))])
            .await?;
        let batches: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.get("batch").and_then(Value::as_i64))
            .collect();
        if batches.is_empty() {
            info!("nothing to roll back");
            return Ok(RollbackReport::default());
        }

        let rolled_back =
            connection::transaction(self.conn.as_ref(), self.revert(&batches)).await?;

        let mut cache = self.applied.lock();
        for name in &rolled_back {
            cache.remove(name);
        }
        info!(batches = ?batches, count = rolled_back.len(), "rollback complete");
        Ok(RollbackReport {
            batches,
            rolled_back,
        })
    }

    async fn revert(&self, batches: &[i64]) -> Result<Vec<String>> {
        let mut reverted = Vec::new();
        for &batch in batches {
            let rows = self
                .conn
                .fetch_all(BATCH_CONTENTS, &[Value::Int(batch)])
                .await?;
            let names: Vec<String> = rows
                .iter()
                .filter_map(|row| row.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect();

            for name in names.into_iter().rev() {
                let unit = self.resolve(&name)?;
                info!(migration = %name, batch, "reverting migration");
                if let Err(err) = unit.down(self.conn.as_ref()).await {
                    error!(migration = %name, error = %err, "rollback of migration failed");
                    return Err(Error::execution(name, err));
                }
                self.conn.execute(REMOVE, &[Value::from(name.as_str())]).await?;
                reverted.push(name);
            }
        }
        Ok(reverted)
    }

    fn resolve(&self, name: &str) -> Result<Arc<dyn MigrationUnit>> {
        if let Some(unit) = self.applied.lock().get(name) {
            return Ok(Arc::clone(unit));
        }
        if let Some(source) = &self.source {
            if let Some(unit) = source.resolve(name)? {
                return Ok(unit);
            }
        }
        warn!(migration = %name, "ledger entry has no matching migration");
        Err(Error::MigrationNotFound {
            name: name.to_string(),
        })
    }

    /// Every ledger row in application order.
    pub async fn status(&self) -> Result<Vec<MigrationRecord>> {
        self.initialize().await?;
        let rows = self.conn.fetch_all(STATUS, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(MigrationRecord {
                    name: row.get("name")?.as_str()?.to_string(),
                    batch: row.get("batch")?.as_i64()?,
                    executed_at: row.get("executed_at").and_then(Value::as_timestamp),
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("applied", &self.applied.lock().len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
