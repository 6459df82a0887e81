//! Run configuration, built once in `main` and passed down explicitly.

use crate::error::{EtlError, Result};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Header label of the economic group column in the raw reports
pub const GROUP_COLUMN_LABEL: &str = "GRUPO ECONÔMICO";
/// Header label of the indicator column in the raw reports
pub const INDICATOR_COLUMN_LABEL: &str = "VARIÁVEL";

const DEFAULT_SKIP_ROWS: usize = 8;

/// PostgreSQL connection parameters
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    /// Connection options with `schema` as the session search path, so queries
    /// can name the star schema tables without qualification.
    pub fn connect_options(&self, schema: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .application_name("anatel-etl")
            .options([("search_path", schema)])
    }
}

/// Static description of one telecom service report
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub service_acronym: String,
    #[serde(alias = "skiprows", default = "default_skip_rows")]
    pub skip_rows: usize,
}

fn default_skip_rows() -> usize {
    DEFAULT_SKIP_ROWS
}

impl ServiceConfig {
    fn new(name: &str, acronym: &str) -> Self {
        Self {
            service_name: name.to_string(),
            service_acronym: acronym.to_string(),
            skip_rows: DEFAULT_SKIP_ROWS,
        }
    }
}

/// Source labels of the two descriptive columns
#[derive(Debug, Clone)]
pub struct DescriptorColumns {
    pub economic_group: String,
    pub indicator: String,
}

impl Default for DescriptorColumns {
    fn default() -> Self {
        Self {
            economic_group: GROUP_COLUMN_LABEL.to_string(),
            indicator: INDICATOR_COLUMN_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub db: DbConfig,
    pub schema: String,
    pub data_dir: PathBuf,
    /// Keyed by upper-case service code (SMP, SCM, STFC)
    pub services: BTreeMap<String, ServiceConfig>,
    pub columns: DescriptorColumns,
}

impl EtlConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup, applying defaults for
    /// anything unset.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port = var("DB_PORT", "5432");
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| EtlError::Config(format!("DB_PORT is not a valid port: '{}'", port)))?;

        Ok(Self {
            db: DbConfig {
                host: var("DB_HOST", "localhost"),
                port,
                database: var("DB_NAME", "anatel_ida_db"),
                user: var("DB_USER", "user"),
                password: var("DB_PASSWORD", "password"),
            },
            schema: var("DB_SCHEMA", "anatel_datamart"),
            data_dir: PathBuf::from(var("DATA_DIR_CONTAINER", "/app/data")),
            services: default_services(),
            columns: DescriptorColumns::default(),
        })
    }

    pub fn service(&self, code: &str) -> Option<&ServiceConfig> {
        self.services.get(&code.to_uppercase())
    }

    /// The twelve month column labels expected in a report for `year`
    pub fn month_columns(year: i32) -> Vec<String> {
        (1..=12).map(|month| format!("{}-{:02}", year, month)).collect()
    }
}

pub fn default_services() -> BTreeMap<String, ServiceConfig> {
    BTreeMap::from([
        ("SMP".to_string(), ServiceConfig::new("Telefonia Celular", "SMP")),
        ("SCM".to_string(), ServiceConfig::new("Banda Larga Fixa", "SCM")),
        ("STFC".to_string(), ServiceConfig::new("Telefonia Fixa Local", "STFC")),
    ])
}

/// Parse a services JSON document: `{ "SMP": { "service_name": ..., "service_acronym": ..., "skiprows": 8 } }`
pub fn parse_services(content: &str) -> Result<BTreeMap<String, ServiceConfig>> {
    let parsed: BTreeMap<String, ServiceConfig> = serde_json::from_str(content)
        .map_err(|e| EtlError::Config(format!("invalid services config: {}", e)))?;

    if parsed.is_empty() {
        return Err(EtlError::Config("services config defines no services".to_string()));
    }

    Ok(parsed
        .into_iter()
        .map(|(code, service)| (code.trim().to_uppercase(), service))
        .collect())
}

pub fn load_services_file(path: &Path) -> Result<BTreeMap<String, ServiceConfig>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EtlError::Config(format!("cannot read services config {}: {}", path.display(), e))
    })?;
    parse_services(&content)
}
