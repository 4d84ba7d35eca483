//! Command-line arguments.

use celeron_core::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Celeron schema migrations.
#[derive(Parser, Debug)]
#[command(name = "celeron")]
#[command(version, about = "Generate, apply and roll back Celeron migrations", long_about = None)]
pub struct Args {
    /// PostgreSQL connection URL (overrides DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Directory scanned for `*.model.json` sources.
    #[arg(long = "models", global = true)]
    pub models_path: Option<PathBuf>,

    /// Directory holding generated migrations.
    #[arg(long = "migrations", global = true)]
    pub migrations_path: Option<PathBuf>,

    /// Maximum number of pooled connections.
    #[arg(long, global = true)]
    pub max_connections: Option<u32>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Discover models and print the generated SQL.
    Generate {
        /// Also write the migrations to the migrations directory.
        #[arg(long)]
        write: bool,
    },
    /// Generate and apply pending migrations.
    Migrate {
        /// Print the statements instead of running them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Roll back the most recent batches.
    Rollback {
        /// Number of batches to roll back.
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// List applied migrations.
    Status,
}

impl Args {
    /// Build the configuration: environment first, then flags.
    pub fn into_config(self) -> (Config, Command, bool) {
        let mut config = Config::from_env();
        if let Some(url) = self.database_url {
            config = config.with_database_url(url);
        }
        if let Some(path) = self.models_path {
            config = config.with_models_path(path);
        }
        if let Some(path) = self.migrations_path {
            config = config.with_migrations_path(path);
        }
        if let Some(max) = self.max_connections {
            config = config.with_max_connections(max);
        }
        (config, self.command, self.json)
    }
}
