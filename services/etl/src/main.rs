//! ETL Service - Loads regulator performance reports into the indicator data mart
//!
//! Responsibilities:
//! - Find `<SERVICE><YYYY>.ods` report files in the data directory
//! - Read each spreadsheet and reshape its month columns into observations
//! - Get-or-create time, economic group, service and indicator dimension rows
//! - Insert each file's facts as one all-or-nothing batch
//!
//! One file failing never stops the run; only a failed connection does.
//! Facts are not deduplicated: loading the same file twice doubles its facts.

mod config;
mod dimension;
mod discovery;
mod error;
mod extract;
mod loader;
#[cfg(test)]
mod memory;
mod pipeline;
mod time_key;
mod transform;
mod warehouse;

use anyhow::{Context, Result};
use clap::Parser;
use config::{load_services_file, EtlConfig};
use dimension::Resolver;
use discovery::discover;
use extract::SpreadsheetReader;
use pipeline::{preview, Pipeline};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warehouse::PgWarehouse;

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Loads service performance reports into the indicator data mart")]
struct Args {
    /// Directory holding the raw report files (overrides DATA_DIR_CONTAINER)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON file with per-service settings (name, acronym, skiprows)
    #[arg(long)]
    services: Option<PathBuf>,

    /// Only process files for this service code
    #[arg(long)]
    service: Option<String>,

    /// Dry run - extract and transform only, no database connection
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = EtlConfig::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = &args.services {
        config.services = load_services_file(path)?;
    }

    info!(">>> starting ETL pipeline <<<");
    info!("Data directory: {}", config.data_dir.display());
    info!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    if !config.data_dir.is_dir() {
        anyhow::bail!("data directory does not exist: {}", config.data_dir.display());
    }

    let mut discovery = discover(&config.data_dir, &config.services)?;
    if let Some(code) = &args.service {
        discovery.retain_service(code);
        info!("Restricted to service {}: {} file(s)", code.to_uppercase(), discovery.files.len());
    }

    if args.dry_run {
        for file in &discovery.files {
            match preview(&SpreadsheetReader, &config, file) {
                Ok(melted) => info!(
                    file = %file.file_name(),
                    months = melted.month_columns.len(),
                    observations = melted.observations.len(),
                    non_numeric = melted.non_numeric_cells,
                    "dry run - nothing loaded"
                ),
                Err(e) => warn!(file = %file.file_name(), "{}", e),
            }
        }
        info!(">>> dry run finished <<<");
        return Ok(());
    }

    let warehouse = match PgWarehouse::connect(&config.db, &config.schema).await {
        Ok(warehouse) => warehouse,
        Err(e) => {
            error!("{}", e);
            return Err(e).context("Failed to connect to database");
        }
    };

    let mut pipeline = Pipeline::new(&config, SpreadsheetReader, Resolver::new(warehouse));
    let summary = pipeline.run(&discovery).await;
    pipeline.into_resolver().into_inner().close().await;

    summary.log();
    info!(">>> ETL pipeline finished <<<");

    Ok(())
}
