//! Celeron command-line client.
//!
//! Generates migrations from model sources, applies them, rolls them back and
//! reports the ledger.

mod args;
mod error;

use args::{Args, Command};
use celeron_core::migration::MigrationStore;
use celeron_core::{
    run_migrations, Config, MigrationGenerator, MigrationManager, PgConnection,
    RecordingConnection, Registry,
};
use clap::Parser;
use error::CliError;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "celeron=info,celeron_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (config, command, json) = Args::parse().into_config();

    if let Err(e) = run(config, command, json).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config, command: Command, json: bool) -> Result<(), CliError> {
    tracing::debug!(
        models = %config.models_path.display(),
        migrations = %config.migrations_path.display(),
        "configuration loaded"
    );

    match command {
        Command::Generate { write } => generate(&config, write, json),
        Command::Migrate { dry_run: true } => migrate_dry_run(&config).await,
        Command::Migrate { dry_run: false } => migrate(&config, json).await,
        Command::Rollback { steps } => rollback(&config, steps, json).await,
        Command::Status => status(&config, json).await,
    }
}

async fn connect(config: &Config) -> Result<Arc<PgConnection>, CliError> {
    if config.database_url.is_none() {
        return Err(CliError::NoDatabase);
    }
    Ok(Arc::new(PgConnection::connect(config).await?))
}

fn generate(config: &Config, write: bool, json: bool) -> Result<(), CliError> {
    let generator = MigrationGenerator::new(Arc::new(Registry::new()), config.clone());
    generator.discover()?;
    let migrations = generator.generate()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&migrations)?);
    } else {
        for migration in &migrations {
            println!("{}", migration.to_sql());
        }
    }

    if write {
        let store = MigrationStore::new(&config.migrations_path);
        for path in store.save_all(&migrations)? {
            eprintln!("wrote {}", path.display());
        }
    }
    Ok(())
}

async fn migrate_dry_run(config: &Config) -> Result<(), CliError> {
    let conn = Arc::new(RecordingConnection::new());
    let generator = MigrationGenerator::new(Arc::new(Registry::new()), config.clone());
    let manager = MigrationManager::new(conn.clone());
    generator.generate_and_run(&manager).await?;

    for sql in conn.sql_log() {
        println!("{};", sql);
    }
    Ok(())
}

async fn migrate(config: &Config, json: bool) -> Result<(), CliError> {
    let conn = connect(config).await?;
    let report = run_migrations(conn.clone(), Arc::new(Registry::new()), config).await;
    conn.close().await;
    let report = report?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "batch": report.batch,
                "applied": report.applied,
            }))?
        );
    } else if report.is_empty() {
        println!("Nothing to migrate.");
    } else {
        for name in &report.applied {
            println!("Migrated: {}", name);
        }
        if let Some(batch) = report.batch {
            println!("Batch {} complete ({} migrations).", batch, report.applied.len());
        }
    }
    Ok(())
}

async fn rollback(config: &Config, steps: u32, json: bool) -> Result<(), CliError> {
    let conn = connect(config).await?;
    let manager = MigrationManager::new(conn.clone())
        .with_source(Arc::new(MigrationStore::new(&config.migrations_path)));
    let report = manager.rollback(steps).await;
    conn.close().await;
    let report = report?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "batches": report.batches,
                "rolled_back": report.rolled_back,
            }))?
        );
    } else if report.rolled_back.is_empty() {
        println!("Nothing to roll back.");
    } else {
        for name in &report.rolled_back {
            println!("Rolled back: {}", name);
        }
    }
    Ok(())
}

async fn status(config: &Config, json: bool) -> Result<(), CliError> {
    let conn = connect(config).await?;
    let records = MigrationManager::new(conn.clone()).status().await;
    conn.close().await;
    let records = records?;

    if json {
        let rows: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "name": r.name,
                    "batch": r.batch,
                    "executed_at": r.executed_at.map(|t| t.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No migrations have been applied.");
        return Ok(());
    }
    let width = records.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);
    println!("{:<width$}  {:>5}  {}", "Name", "Batch", "Executed at", width = width);
    for record in &records {
        let executed = record
            .executed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{:<width$}  {:>5}  {}", record.name, record.batch, executed, width = width);
    }
    Ok(())
}
