//! Celeron Core - model registry, active-record data mapper and schema
//! migrations for PostgreSQL.
//!
//! Models are described once in a [`Registry`]. The same registry drives the
//! data mapper ([`Orm`], [`Model`], [`Record`]) and the migration engine
//! ([`MigrationGenerator`], [`MigrationManager`]).

pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod migration;
pub mod model;
pub mod query;
pub mod value;

pub use catalog::{
    ColumnDef, ColumnType, DefaultValue, ModelDef, Registry, RelationDef, RelationKind,
    IMPLICIT_COLUMNS,
};
pub use config::Config;
pub use connection::{transaction, Connection, PgConnection, RecordingConnection};
pub use error::{Error, ErrorKind, Result};
pub use migration::{
    run_migrations, MigrationGenerator, MigrationKind, MigrationManager, MigrationRecord,
    MigrationReport, MigrationSource, MigrationStore, MigrationUnit, RollbackReport, SqlMigration,
};
pub use model::{
    HookPoint, HookRegistry, Model, Orm, Page, Record, Related, Rule, ValidationErrors, Validators,
};
pub use query::{Conditions, Direction, QueryOptions, Search, SearchMode, Statement};
pub use value::{Row, Value};
