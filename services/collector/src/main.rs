//! Collector Service - Downloads raw performance reports into the data directory
//!
//! Responsibilities:
//! - Fetch the configured report spreadsheets (one per service and year)
//! - Apply rate limiting to avoid degrading the source site
//! - Skip files whose content has not changed since the last download
//! - Store each report as `<SERVICE><YYYY>.ods` for the ETL to pick up
//!
//! Usage:
//!   # All enabled sources:
//!   cargo run --bin collector -- --sources config/sources.json
//!
//!   # One service, starting from an empty data directory:
//!   cargo run --bin collector -- --sources config/sources.json --service SMP --clean
//!
//! The URLs in `config/sources.json` are placeholders: replace each one with the
//! `.ods` resource link listed on the dataset page at
//! https://dados.gov.br/dados/conjuntos-dados/indice-desempenho-atendimento

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Downloads raw performance reports for the ETL")]
struct Args {
    /// Path to sources config file
    #[arg(long)]
    sources: PathBuf,

    /// Only collect this service code (SMP, SCM, STFC)
    #[arg(long)]
    service: Option<String>,

    /// Overwrite files even when the content is unchanged
    #[arg(long, default_value = "false")]
    force: bool,

    /// Remove existing .ods files from the data directory first
    #[arg(long, default_value = "false")]
    clean: bool,

    /// Dry run - download and hash, but don't write files
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Also collect sources marked `"enabled": false`
    #[arg(long, default_value = "false")]
    include_disabled: bool,
}

// =============================================================================
// Source Configuration Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SourcesConfig {
    #[serde(default)]
    version: String,
    sources: Vec<Source>,
}

#[derive(Debug, Deserialize)]
struct Source {
    service: String,
    year: i32,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
struct Config {
    data_dir: PathBuf,
    rate_limit_ms: u64,
}

impl Config {
    fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR_CONTAINER").unwrap_or_else(|_| "./data".to_string()),
            ),
            rate_limit_ms: std::env::var("RATE_LIMIT_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FetchOutcome {
    Saved(PathBuf),
    Unchanged(PathBuf),
    DryRun,
}

/// File name the ETL expects for a report: `<SERVICE><YYYY>.ods`
fn target_file_name(service: &str, year: i32) -> Result<String> {
    let code = service.trim().to_uppercase();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        anyhow::bail!("invalid service code '{}'", service);
    }
    if !(1000..=9999).contains(&year) {
        anyhow::bail!("year {} is not 4 digits", year);
    }
    Ok(format!("{}{}.ods", code, year))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Hash of the file at `path`, if there is one
async fn existing_hash(path: &Path) -> Result<Option<String>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(sha256_hex(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Write via a temporary file and rename, so the ETL never sees a partial report
async fn save_atomically(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;

    let target = dir.join(file_name);
    let partial = dir.join(format!(".{}.part", file_name));

    fs::write(&partial, bytes)
        .await
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    fs::rename(&partial, &target)
        .await
        .with_context(|| format!("Failed to move {} into place", target.display()))?;

    Ok(target)
}

/// Remove every `.ods` file in `dir`. Returns how many were removed.
async fn clean_data_dir(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).context("Failed to list data directory"),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_ods = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("ods"))
            .unwrap_or(false);
        if is_ods && entry.file_type().await?.is_file() {
            fs::remove_file(&path).await?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// Load sources configuration from JSON file
async fn load_sources_config(path: &Path) -> Result<SourcesConfig> {
    let content = fs::read_to_string(path)
        .await
        .context("Failed to read sources config")?;
    let config: SourcesConfig =
        serde_json::from_str(&content).context("Failed to parse sources config")?;
    Ok(config)
}

/// Download one report and store it under its conventional name
async fn fetch_source(
    client: &reqwest::Client,
    config: &Config,
    source: &Source,
    force: bool,
    dry_run: bool,
) -> Result<FetchOutcome> {
    let file_name = target_file_name(&source.service, source.year)?;

    info!("Rate limit: waiting {}ms", config.rate_limit_ms);
    sleep(Duration::from_millis(config.rate_limit_ms)).await;

    info!("Fetching: {}", source.url);
    let resp = client
        .get(&source.url)
        .send()
        .await?
        .error_for_status()
        .context("HTTP request failed")?;

    let bytes = resp.bytes().await?;
    let content_hash = sha256_hex(&bytes);
    info!(bytes = bytes.len(), hash = %content_hash, "downloaded {}", file_name);

    if dry_run {
        info!("Dry run - would write {}", file_name);
        return Ok(FetchOutcome::DryRun);
    }

    store_report(&config.data_dir, &file_name, &bytes, force).await
}

/// Write `bytes` as `file_name` unless the file already holds the same content.
/// `force` writes regardless.
async fn store_report(dir: &Path, file_name: &str, bytes: &[u8], force: bool) -> Result<FetchOutcome> {
    let target = dir.join(file_name);
    if !force && existing_hash(&target).await?.as_deref() == Some(sha256_hex(bytes).as_str()) {
        return Ok(FetchOutcome::Unchanged(target));
    }

    let saved = save_atomically(dir, file_name, bytes).await?;
    Ok(FetchOutcome::Saved(saved))
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
    let config = Config::from_env();

    info!("=== Report Collector ===");
    info!("Data directory: {}", config.data_dir.display());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .user_agent("anatel-ida-etl/0.1 (coleta de relatórios de desempenho)")
        .build()?;

    info!("Loading sources from: {}", args.sources.display());
    let sources_config = load_sources_config(&args.sources).await?;
    if !sources_config.version.is_empty() {
        info!("Config version: {}", sources_config.version);
    }

    let sources: Vec<&Source> = sources_config
        .sources
        .iter()
        .filter(|s| {
            if !args.include_disabled && !s.enabled {
                return false;
            }
            match &args.service {
                Some(code) => s.service.eq_ignore_ascii_case(code),
                None => true,
            }
        })
        .collect();

    if sources.is_empty() {
        anyhow::bail!("No sources match the filter criteria");
    }

    if args.clean && !args.dry_run {
        let removed = clean_data_dir(&config.data_dir).await?;
        info!("Removed {} existing report file(s)", removed);
    }

    info!("Processing {} source(s)...", sources.len());

    let mut saved = 0;
    let mut unchanged = 0;
    let mut failed = 0;

    for source in sources {
        info!("[{} {}] {}", source.service.to_uppercase(), source.year, source.description);

        match fetch_source(&client, &config, source, args.force, args.dry_run).await {
            Ok(FetchOutcome::Saved(path)) => {
                info!("Saved: {}", path.display());
                saved += 1;
            }
            Ok(FetchOutcome::Unchanged(path)) => {
                info!("Unchanged: {}", path.display());
                unchanged += 1;
            }
            Ok(FetchOutcome::DryRun) => {}
            Err(e) => {
                error!("Failed: {:#}", e);
                failed += 1;
            }
        }
    }

    info!("=== Collection Summary ===");
    info!("Saved: {}", saved);
    info!("Unchanged: {}", unchanged);
    if failed > 0 {
        warn!("Failed: {}", failed);
    }

    Ok(())
}
