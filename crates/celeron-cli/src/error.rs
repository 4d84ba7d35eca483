//! CLI error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Failure reported by the core library.
    #[error(transparent)]
    Core(#[from] celeron_core::Error),

    /// The command needs a database and none was configured.
    #[error("no database configured; pass --database-url or set DATABASE_URL")]
    NoDatabase,

    /// Output could not be encoded.
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}
