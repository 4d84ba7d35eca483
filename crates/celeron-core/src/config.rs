//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default directory scanned for `*.model.json` sources.
pub const DEFAULT_MODELS_PATH: &str = "./models";

/// Default directory holding persisted migration units.
pub const DEFAULT_MIGRATIONS_PATH: &str = "./migrations";

/// Default maximum pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default timeout for acquiring a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration shared by the data mapper, generator and migration manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// PostgreSQL connection URL, if any.
    pub database_url: Option<String>,

    /// Directory scanned for model sources.
    pub models_path: PathBuf,

    /// Directory where migration units are written and resolved.
    pub migrations_path: PathBuf,

    /// Maximum number of pooled connections.
    pub max_connections: u32,

    /// Timeout for acquiring a pooled connection.
    pub acquire_timeout: Duration,
}

impl Config {
    /// Create a configuration with defaults and no database URL.
    pub fn new() -> Self {
        Self {
            database_url: None,
            models_path: PathBuf::from(DEFAULT_MODELS_PATH),
            migrations_path: PathBuf::from(DEFAULT_MIGRATIONS_PATH),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Build from environment variables, falling back to defaults.
    ///
    /// Reads `DATABASE_URL`, `CELERON_MODELS_PATH`, `CELERON_MIGRATIONS_PATH`
    /// and `CELERON_MAX_CONNECTIONS`. An unparseable pool size is ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            config.database_url = Some(url);
        }
        if let Some(path) = lookup("CELERON_MODELS_PATH") {
            config.models_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("CELERON_MIGRATIONS_PATH") {
            config.migrations_path = PathBuf::from(path);
        }
        if let Some(max) = lookup("CELERON_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.max_connections = max;
        }
        config
    }

    /// Set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Set the model source directory.
    pub fn with_models_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.models_path = path.into();
        self
    }

    /// Set the migration directory.
    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = path.into();
        self
    }

    /// Set the maximum pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the pool acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
