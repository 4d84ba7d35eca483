//! Migration generation from the registry.

use super::ddl;
use super::discovery;
use super::manager::{MigrationManager, MigrationReport};
use super::unit::{into_units, name_stem, MigrationSource, MigrationUnit, SqlMigration};
use crate::catalog::Registry;
use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// Turns registered models into an ordered list of migrations.
#[derive(Debug, Clone)]
pub struct MigrationGenerator {
    registry: Arc<Registry>,
    config: Config,
}

impl MigrationGenerator {
    pub fn new(registry: Arc<Registry>, config: Config) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Load every model source under the configured models path.
    pub fn discover(&self) -> Result<Vec<String>> {
        discovery::discover_models(&self.config.models_path, &self.registry).map_err(generation)
    }

    /// Generate migrations for every registered model, stamped now.
    pub fn generate(&self) -> Result<Vec<SqlMigration>> {
        self.generate_at(Utc::now().timestamp_millis())
    }

    /// Generate migrations for every registered model.
    ///
    /// All primary migrations come first, then one join migration per
    /// distinct through table. Any failure aborts the whole set.
    pub fn generate_at(&self, stamp: i64) -> Result<Vec<SqlMigration>> {
        let models = self.registry.get_all_models();
        let mut primaries = Vec::with_capacity(models.len());
        let mut joins = Vec::new();
        let mut through_tables = HashSet::new();

        for model in models.values() {
            primaries.push(ddl::primary_migration(model, stamp));

            for relation in model.many_to_many() {
                let related = self.registry.get_model_definition(&relation.target).map_err(|err| {
                    Error::MigrationGeneration(format!(
                        "relation {}.{}: {}",
                        model.name, relation.name, err
                    ))
                })?;
                let join = ddl::join_migration(model, &related, relation, stamp).map_err(generation)?;
                if through_tables.insert(join.table.clone()) {
                    joins.push(join);
                } else {
                    tracing::debug!(table = %join.table, model = %model.name, "join table already generated");
                }
            }
        }

        tracing::info!(
            primaries = primaries.len(),
            joins = joins.len(),
            "generated migrations"
        );
        primaries.append(&mut joins);
        Ok(primaries)
    }

    /// Discover models, generate their migrations and apply them.
    pub async fn generate_and_run(&self, manager: &MigrationManager) -> Result<MigrationReport> {
        self.discover()?;
        let migrations = self.generate()?;
        manager.migrate_with_migrations(into_units(migrations)).await
    }
}

fn generation(err: Error) -> Error {
    match err {
        Error::MigrationGeneration(_) => err,
        other => Error::MigrationGeneration(other.to_string()),
    }
}

/// Regenerates the migration a ledger name refers to, matching on the name
/// without its stamp.
impl MigrationSource for MigrationGenerator {
    fn resolve(&self, name: &str) -> Result<Option<Arc<dyn MigrationUnit>>> {
        let stem = name_stem(name);
        let found = self
            .generate_at(0)?
            .into_iter()
            .find(|m| m.stem() == stem)
            .map(|mut m| {
                m.name = name.to_string();
                Arc::new(m) as Arc<dyn MigrationUnit>
            });
        Ok(found)
    }
}
