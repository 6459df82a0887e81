//! Fact loading: resolve every observation's dimension keys and insert the
//! file's facts as one batch.

use crate::dimension::{Resolver, SurrogateKey};
use crate::error::{EtlError, Result};
use crate::transform::Observation;
use crate::warehouse::{FactRow, Warehouse};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Why an observation did not become a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    MissingMonthLabel,
    MissingEconomicGroup,
    MissingIndicator,
    MalformedTimeLabel,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::MissingMonthLabel => "missing month label",
            SkipReason::MissingEconomicGroup => "missing economic group",
            SkipReason::MissingIndicator => "missing indicator",
            SkipReason::MalformedTimeLabel => "malformed month label",
        };
        f.write_str(text)
    }
}

/// Per-row result of staging an observation
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Staged(FactRow),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Fact rows assembled for the batch
    pub staged: usize,
    /// Fact rows committed
    pub inserted: u64,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl LoadReport {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve the keys for one observation.
///
/// Missing fields and malformed month labels skip the row; storage errors
/// propagate and abandon the file.
pub async fn stage<W: Warehouse>(
    resolver: &mut Resolver<W>,
    service: SurrogateKey,
    observation: &Observation,
) -> Result<RowOutcome> {
    if present(Some(observation.ano_mes.as_str())).is_none() {
        return Ok(RowOutcome::Skipped(SkipReason::MissingMonthLabel));
    }
    let Some(group) = present(observation.economic_group.as_deref()) else {
        return Ok(RowOutcome::Skipped(SkipReason::MissingEconomicGroup));
    };
    let Some(indicator) = present(observation.indicator.as_deref()) else {
        return Ok(RowOutcome::Skipped(SkipReason::MissingIndicator));
    };

    let time = match resolver.time(&observation.ano_mes).await {
        Ok(key) => key,
        Err(e @ EtlError::MalformedTimeLabel { .. }) => {
            warn!("{}", e);
            return Ok(RowOutcome::Skipped(SkipReason::MalformedTimeLabel));
        }
        Err(e) => return Err(e),
    };
    let economic_group = resolver.economic_group(group).await?;
    let indicator = resolver.indicator(indicator).await?;

    Ok(RowOutcome::Staged(FactRow {
        time,
        economic_group,
        service,
        indicator,
        value: observation.value,
    }))
}

/// Stage every observation and insert the resulting facts in one batch.
///
/// An empty batch is not an error and performs no insert. A failed insert
/// leaves no facts behind and is returned to the caller.
pub async fn load<W: Warehouse>(
    resolver: &mut Resolver<W>,
    service: SurrogateKey,
    observations: &[Observation],
) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    let mut batch = Vec::with_capacity(observations.len());

    for (idx, observation) in observations.iter().enumerate() {
        match stage(resolver, service, observation).await? {
            RowOutcome::Staged(fact) => batch.push(fact),
            RowOutcome::Skipped(reason) => {
                warn!(
                    row = idx,
                    group = ?observation.economic_group,
                    indicator = ?observation.indicator,
                    month = %observation.ano_mes,
                    "skipping observation: {}",
                    reason
                );
                *report.skipped.entry(reason).or_default() += 1;
            }
        }
    }

    report.staged = batch.len();

    if batch.is_empty() {
        info!("no valid fact rows to insert");
        return Ok(report);
    }

    report.inserted = resolver.warehouse_mut().insert_facts(&batch).await?;
    info!(rows = report.inserted, "inserted facts");

    Ok(report)
}
