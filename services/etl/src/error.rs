//! Error taxonomy for the ETL run.
//!
//! Scope of each variant:
//! - `Connection`, `Config`: abort the whole run
//! - `Extraction`, `Storage`, `NamingConventionMismatch`: abandon one file
//! - `MalformedTimeLabel`: skip one row

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = EtlError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("failed to connect to {host}:{port}/{database}: {source}")]
    Connection {
        host: String,
        port: u16,
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot extract {}: {reason}", .file.display())]
    Extraction { file: PathBuf, reason: String },

    #[error("malformed time label '{label}' (expected YYYY-MM)")]
    MalformedTimeLabel { label: String },

    #[error("storage error on {table} for {key}: {source}")]
    Storage {
        table: &'static str,
        key: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("file '{file}' does not match <SERVICE><YYYY>.ods: {reason}")]
    NamingConventionMismatch { file: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EtlError {
    pub fn extraction(file: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Extraction {
            file: file.into(),
            reason: reason.to_string(),
        }
    }

    pub fn naming(file: &str, reason: impl ToString) -> Self {
        Self::NamingConventionMismatch {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}
