//! In-memory [`Warehouse`] with fault injection, used by the tests.

use crate::dimension::{Dimension, SurrogateKey};
use crate::error::{EtlError, Result};
use crate::warehouse::{FactRow, Warehouse, FACT_TABLE};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    /// Natural keys per table; the surrogate key is the position + 1
    tables: HashMap<&'static str, Vec<String>>,
    facts: Vec<FactRow>,
    failing_tables: HashSet<&'static str>,
    failing_fact_batches: usize,
    resolve_calls: usize,
}

impl MemoryWarehouse {
    /// Every resolution against `table` fails with a storage error
    pub fn failing_table(mut self, table: &'static str) -> Self {
        self.failing_tables.insert(table);
        self
    }

    /// The next `batches` fact inserts fail with a storage error
    pub fn failing_fact_batches(mut self, batches: usize) -> Self {
        self.failing_fact_batches = batches;
        self
    }

    pub fn heal(&mut self) {
        self.failing_tables.clear();
        self.failing_fact_batches = 0;
    }

    pub fn rows(&self, table: &str) -> &[String] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn key_of(&self, table: &str, natural_key: &str) -> Option<SurrogateKey> {
        self.rows(table)
            .iter()
            .position(|k| k == natural_key)
            .map(|idx| SurrogateKey(idx as i32 + 1))
    }

    pub fn facts(&self) -> &[FactRow] {
        &self.facts
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls
    }
}

fn injected() -> sqlx::Error {
    sqlx::Error::Protocol("injected failure".to_string())
}

impl Warehouse for MemoryWarehouse {
    async fn resolve<D: Dimension>(&mut self, record: &D) -> Result<SurrogateKey> {
        self.resolve_calls += 1;
        let natural_key = record.natural_key();

        if self.failing_tables.contains(D::TABLE) {
            return Err(EtlError::Storage {
                table: D::TABLE,
                key: natural_key,
                source: injected(),
            });
        }

        if let Some(key) = self.key_of(D::TABLE, &natural_key) {
            return Ok(key);
        }

        let rows = self.tables.entry(D::TABLE).or_default();
        rows.push(natural_key);
        Ok(SurrogateKey(rows.len() as i32))
    }

    async fn insert_facts(&mut self, facts: &[FactRow]) -> Result<u64> {
        if self.failing_fact_batches > 0 {
            self.failing_fact_batches -= 1;
            return Err(EtlError::Storage {
                table: FACT_TABLE,
                key: format!("batch of {} rows", facts.len()),
                source: injected(),
            });
        }

        self.facts.extend_from_slice(facts);
        Ok(facts.len() as u64)
    }
}
