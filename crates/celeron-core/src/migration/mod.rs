//! Schema migrations generated from the model registry.
//!
//! - [`discovery`] loads `*.model.json` sources into a [`Registry`]
//! - [`MigrationGenerator`] renders one primary migration per model and one
//!   join migration per many-to-many through table
//! - [`MigrationManager`] applies them once, recording each in the
//!   `migrations` ledger under a batch number, and reverts whole batches
//! - [`MigrationStore`] persists generated migrations so later processes can
//!   roll them back
//!
//! # Example
//!
//! ```ignore
//! use celeron_core::{run_migrations, Config, PgConnection, Registry};
//!
//! let config = Config::from_env();
//! let conn = Arc::new(PgConnection::connect(&config).await?);
//! let report = run_migrations(conn, Arc::new(Registry::new()), &config).await?;
//! println!("batch {:?}: {} applied", report.batch, report.applied.len());
//! ```

pub mod ddl;
pub mod discovery;
pub mod generator;
pub mod manager;
pub mod store;
pub mod unit;

pub use discovery::{discover_models, parse_model_source};
pub use generator::MigrationGenerator;
pub use manager::{MigrationManager, MigrationRecord, MigrationReport, RollbackReport};
pub use store::MigrationStore;
pub use unit::{into_units, MigrationKind, MigrationSource, MigrationUnit, SqlMigration};

use crate::catalog::Registry;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use std::sync::Arc;

/// Discover models, generate their migrations, store them and apply them.
///
/// Nothing is stored or applied if discovery or generation fails.
pub async fn run_migrations(
    connection: Arc<dyn Connection>,
    registry: Arc<Registry>,
    config: &Config,
) -> Result<MigrationReport> {
    let generator = MigrationGenerator::new(registry, config.clone());
    generator.discover()?;
    let migrations = generator.generate()?;

    let store = MigrationStore::new(&config.migrations_path);
    store.save_all(&migrations)?;

    let manager = MigrationManager::new(connection).with_source(Arc::new(store));
    manager.migrate_with_migrations(into_units(migrations)).await
}
