//! Report file discovery and `<SERVICE><YYYY>.ods` name parsing.

use crate::config::ServiceConfig;
use crate::error::{EtlError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z]+)(\d+)\.ods$").expect("file name pattern is valid")
});

/// A report file whose name maps to a configured service and a year
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub path: PathBuf,
    /// Upper-case service code
    pub service_code: String,
    pub year: i32,
}

impl Discovered {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, Default)]
pub struct Discovery {
    /// Sorted by file name
    pub files: Vec<Discovered>,
    /// One `NamingConventionMismatch` per rejected `.ods` file
    pub rejected: Vec<EtlError>,
}

impl Discovery {
    pub fn found(&self) -> usize {
        self.files.len() + self.rejected.len()
    }

    /// Keep only files for `code`
    pub fn retain_service(&mut self, code: &str) {
        let code = code.to_uppercase();
        self.files.retain(|f| f.service_code == code);
    }
}

/// Parse a report file name into (service code, year)
pub fn parse_file_name(
    name: &str,
    services: &BTreeMap<String, ServiceConfig>,
) -> Result<(String, i32)> {
    let caps = FILE_NAME
        .captures(name)
        .ok_or_else(|| EtlError::naming(name, "name does not match the expected pattern"))?;

    let code = caps[1].to_uppercase();
    let digits = &caps[2];

    if digits.len() != 4 {
        return Err(EtlError::naming(name, format!("year '{}' is not 4 digits", digits)));
    }
    let year: i32 = digits
        .parse()
        .map_err(|_| EtlError::naming(name, format!("invalid year '{}'", digits)))?;

    if !services.contains_key(&code) {
        return Err(EtlError::naming(name, format!("unrecognized service '{}'", code)));
    }

    Ok((code, year))
}

fn is_ods(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("ods"))
        .unwrap_or(false)
}

/// List the `.ods` files in `dir` and sort them into accepted and rejected
pub fn discover(dir: &Path, services: &BTreeMap<String, ServiceConfig>) -> Result<Discovery> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        EtlError::Config(format!("cannot read data directory {}: {}", dir.display(), e))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_ods(path))
        .collect();
    paths.sort();

    let mut discovery = Discovery::default();

    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        info!("found file: {}", name);

        match parse_file_name(&name, services) {
            Ok((service_code, year)) => discovery.files.push(Discovered {
                path,
                service_code,
                year,
            }),
            Err(e) => {
                warn!("{}, skipping", e);
                discovery.rejected.push(e);
            }
        }
    }

    if discovery.found() == 0 {
        info!("no .ods files found in {}", dir.display());
    }

    Ok(discovery)
}
