//! Per-file orchestration: extract, transform, resolve the service, load.
//!
//! Nothing that goes wrong inside one file escapes [`Pipeline::process_file`];
//! the outcome is recorded in a [`FileSummary`] and the run moves on.

use crate::config::{EtlConfig, ServiceConfig};
use crate::dimension::Resolver;
use crate::discovery::{Discovered, Discovery};
use crate::error::{EtlError, Result};
use crate::extract::TableReader;
use crate::loader::{self, LoadReport};
use crate::transform::{self, Melted};
use crate::warehouse::Warehouse;
use std::fmt;
use std::path::Path;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Facts were loaded (possibly zero, when every row was skipped)
    Loaded,
    /// Extraction or transform produced no usable data
    Empty,
    /// Extraction or storage failed; nothing from the fact batch was committed
    Failed,
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileOutcome::Loaded => "loaded",
            FileOutcome::Empty => "empty",
            FileOutcome::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileSummary {
    pub file: String,
    pub service: String,
    pub year: i32,
    pub observations: usize,
    pub load: LoadReport,
    pub outcome: FileOutcome,
    pub error: Option<String>,
}

impl FileSummary {
    fn new(file: &Discovered) -> Self {
        Self {
            file: file.file_name(),
            service: file.service_code.clone(),
            year: file.year,
            observations: 0,
            load: LoadReport::default(),
            outcome: FileOutcome::Empty,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub found: usize,
    pub naming_mismatches: usize,
    pub loaded: usize,
    pub empty: usize,
    pub failed: usize,
    pub facts_inserted: u64,
    pub files: Vec<FileSummary>,
}

impl RunSummary {
    pub fn record(&mut self, file: FileSummary) {
        match file.outcome {
            FileOutcome::Loaded => self.loaded += 1,
            FileOutcome::Empty => self.empty += 1,
            FileOutcome::Failed => self.failed += 1,
        }
        self.facts_inserted += file.load.inserted;
        self.files.push(file);
    }

    pub fn log(&self) {
        for file in &self.files {
            info!(
                file = %file.file,
                outcome = %file.outcome,
                observations = file.observations,
                facts = file.load.inserted,
                skipped = file.load.skipped_total(),
                "file summary"
            );
        }
        info!(
            found = self.found,
            naming_mismatches = self.naming_mismatches,
            loaded = self.loaded,
            empty = self.empty,
            failed = self.failed,
            facts = self.facts_inserted,
            "run summary"
        );
    }
}

/// Extract and reshape one file. `Ok(None)` when the sheet has no data rows.
fn extract_and_transform<R: TableReader>(
    reader: &R,
    config: &EtlConfig,
    path: &Path,
    service: &ServiceConfig,
    year: i32,
) -> Result<Option<Melted>> {
    let raw = reader.read(path, service.skip_rows)?;
    if raw.is_empty() {
        warn!("extraction produced no data rows");
        return Ok(None);
    }

    let melted = transform::transform(&raw, &config.columns, &EtlConfig::month_columns(year));
    Ok(Some(melted))
}

/// Extract and transform without touching storage
pub fn preview<R: TableReader>(reader: &R, config: &EtlConfig, file: &Discovered) -> Result<Melted> {
    let service = config
        .service(&file.service_code)
        .ok_or_else(|| EtlError::naming(&file.file_name(), "service is not configured"))?;
    Ok(extract_and_transform(reader, config, &file.path, service, file.year)?.unwrap_or_default())
}

pub struct Pipeline<'c, R, W> {
    config: &'c EtlConfig,
    reader: R,
    resolver: Resolver<W>,
}

impl<'c, R: TableReader, W: Warehouse> Pipeline<'c, R, W> {
    pub fn new(config: &'c EtlConfig, reader: R, resolver: Resolver<W>) -> Self {
        Self {
            config,
            reader,
            resolver,
        }
    }

    pub fn into_resolver(self) -> Resolver<W> {
        self.resolver
    }

    /// Process every discovered file in order. Never fails: each file's
    /// outcome lands in the summary.
    pub async fn run(&mut self, discovery: &Discovery) -> RunSummary {
        let mut summary = RunSummary {
            found: discovery.found(),
            naming_mismatches: discovery.rejected.len(),
            ..RunSummary::default()
        };

        for file in &discovery.files {
            let file_summary = self.process_file(file).await;
            summary.record(file_summary);
        }

        summary
    }

    pub async fn process_file(&mut self, file: &Discovered) -> FileSummary {
        let span = info_span!("file", name = %file.file_name(), service = %file.service_code, year = file.year);

        async {
            info!("processing file");
            let mut summary = FileSummary::new(file);

            if let Err(e) = self.try_process(file, &mut summary).await {
                error!("file abandoned: {}", e);
                summary.outcome = FileOutcome::Failed;
                summary.error = Some(e.to_string());
            }

            info!(outcome = %summary.outcome, "finished file");
            summary
        }
        .instrument(span)
        .await
    }

    async fn try_process(&mut self, file: &Discovered, summary: &mut FileSummary) -> Result<()> {
        let config = self.config;
        let service = config
            .service(&file.service_code)
            .ok_or_else(|| EtlError::naming(&file.file_name(), "service is not configured"))?;

        let Some(melted) =
            extract_and_transform(&self.reader, config, &file.path, service, file.year)?
        else {
            summary.outcome = FileOutcome::Empty;
            return Ok(());
        };

        if melted.is_empty() {
            warn!("no observations after transform");
            summary.outcome = FileOutcome::Empty;
            return Ok(());
        }
        summary.observations = melted.observations.len();

        let service_key = self
            .resolver
            .service(&service.service_name, &service.service_acronym)
            .await?;

        summary.load = loader::load(&mut self.resolver, service_key, &melted.observations).await?;
        summary.outcome = FileOutcome::Loaded;
        Ok(())
    }
}
