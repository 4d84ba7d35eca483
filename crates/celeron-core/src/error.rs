//! Core error types.

use crate::model::ValidationErrors;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the registry, data mapper and migration engine.
#[derive(Debug, Error)]
pub enum Error {
    /// No model is registered under this name.
    #[error("model {model} is not registered")]
    NotRegistered {
        /// The requested model name.
        model: String,
    },

    /// A database operation was attempted before a connection was set.
    #[error("database connection not set")]
    ConnectionNotSet,

    /// The operation is not valid for the current state of the record or relation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The model declares no relation with this name.
    #[error("relation {relation} not found on model {model}")]
    RelationNotFound {
        /// Owning model name.
        model: String,
        /// Requested relation name.
        relation: String,
    },

    /// A model, column or relation definition is malformed.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// A query referenced a column the model does not declare.
    #[error("unknown column {column} on model {model}")]
    UnknownColumn {
        /// Model name.
        model: String,
        /// Offending column name.
        column: String,
    },

    /// One or more validation rules failed.
    #[error("{0}")]
    Validation(ValidationErrors),

    /// Model discovery or migration synthesis failed; nothing was executed.
    #[error("migration generation failed: {0}")]
    MigrationGeneration(String),

    /// A migration's `up` or `down` failed; its transaction was rolled back.
    #[error("migration {migration} failed: {source}")]
    MigrationExecution {
        /// Name of the failing migration.
        migration: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A ledger entry could not be resolved to an executable migration.
    #[error("migration {name} could not be resolved")]
    MigrationNotFound {
        /// Ledger name of the migration.
        name: String,
    },

    /// `begin` was called while a transaction is already open.
    #[error("a transaction is already active on this connection")]
    AlreadyInTransaction,

    /// `commit` or `rollback` was called with no open transaction.
    #[error("no active transaction on this connection")]
    NoActiveTransaction,

    /// PostgreSQL driver error.
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Connection-level failure reported by a non-sqlx connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A row could not be decoded into a value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable discriminant for [`Error`], suitable for matching by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotRegistered,
    ConnectionNotSet,
    InvalidState,
    RelationNotFound,
    InvalidDefinition,
    UnknownColumn,
    Validation,
    MigrationGeneration,
    MigrationExecution,
    MigrationNotFound,
    AlreadyInTransaction,
    NoActiveTransaction,
    Database,
    Decode,
    Io,
    Serialization,
}

impl Error {
    /// Get the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotRegistered { .. } => ErrorKind::NotRegistered,
            Error::ConnectionNotSet => ErrorKind::ConnectionNotSet,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::RelationNotFound { .. } => ErrorKind::RelationNotFound,
            Error::InvalidDefinition(_) => ErrorKind::InvalidDefinition,
            Error::UnknownColumn { .. } => ErrorKind::UnknownColumn,
            Error::Validation(_) => ErrorKind::Validation,
            Error::MigrationGeneration(_) => ErrorKind::MigrationGeneration,
            Error::MigrationExecution { .. } => ErrorKind::MigrationExecution,
            Error::MigrationNotFound { .. } => ErrorKind::MigrationNotFound,
            Error::AlreadyInTransaction => ErrorKind::AlreadyInTransaction,
            Error::NoActiveTransaction => ErrorKind::NoActiveTransaction,
            Error::Sql(_) | Error::Connection(_) => ErrorKind::Database,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Wrap a failure raised while running a migration.
    pub(crate) fn execution(migration: impl Into<String>, source: Error) -> Self {
        Error::MigrationExecution {
            migration: migration.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn not_registered(model: impl Into<String>) -> Self {
        Error::NotRegistered {
            model: model.into(),
        }
    }
}
