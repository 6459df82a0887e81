//! Dimension rows and the get-or-create resolver.
//!
//! Each dimension is a typed record naming its table, surrogate key column and
//! natural key, with static parameterized lookup/insert statements. The
//! [`Resolver`] turns a record into its surrogate key, creating the row on
//! first use and remembering committed keys for the rest of the run.

use crate::error::Result;
use crate::time_key::TimeDimension;
use crate::warehouse::Warehouse;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::Postgres;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// System-assigned integer id of a dimension row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurrogateKey(pub i32);

impl fmt::Display for SurrogateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lookup/insert query returning the surrogate key column
pub type KeyQuery<'q> = QueryAs<'q, Postgres, (i32,), PgArguments>;

/// A row of one of the star schema dimension tables
pub trait Dimension {
    const TABLE: &'static str;
    const KEY_COLUMN: &'static str;
    /// `SELECT <key> FROM <table> WHERE <natural key columns> = ...`
    const LOOKUP_SQL: &'static str;
    /// `INSERT INTO <table> (<all columns>) VALUES (...) RETURNING <key>`
    const INSERT_SQL: &'static str;

    /// Natural key rendered as text, for caching and diagnostics
    fn natural_key(&self) -> String;

    fn bind_lookup<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q>;

    fn bind_insert<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q>;
}

impl Dimension for TimeDimension {
    const TABLE: &'static str = "dim_tempo";
    const KEY_COLUMN: &'static str = "id_tempo";
    const LOOKUP_SQL: &'static str = "SELECT id_tempo FROM dim_tempo WHERE ano_mes = $1";
    const INSERT_SQL: &'static str = "INSERT INTO dim_tempo (ano_mes, ano, mes, data_completa) \
         VALUES ($1, $2, $3, $4) RETURNING id_tempo";

    fn natural_key(&self) -> String {
        self.ano_mes.clone()
    }

    fn bind_lookup<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query.bind(self.ano_mes.as_str())
    }

    fn bind_insert<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query
            .bind(self.ano_mes.as_str())
            .bind(self.ano)
            .bind(self.mes as i32)
            .bind(self.data_completa)
    }
}

/// `dim_grupo_economico` row, keyed on the group name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EconomicGroup<'a> {
    pub name: &'a str,
}

impl Dimension for EconomicGroup<'_> {
    const TABLE: &'static str = "dim_grupo_economico";
    const KEY_COLUMN: &'static str = "id_grupo_economico";
    const LOOKUP_SQL: &'static str =
        "SELECT id_grupo_economico FROM dim_grupo_economico WHERE nome_grupo_economico = $1";
    const INSERT_SQL: &'static str = "INSERT INTO dim_grupo_economico (nome_grupo_economico) \
         VALUES ($1) RETURNING id_grupo_economico";

    fn natural_key(&self) -> String {
        self.name.to_string()
    }

    fn bind_lookup<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query.bind(self.name)
    }

    fn bind_insert<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query.bind(self.name)
    }
}

/// `dim_servico` row, keyed on the service code only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service<'a> {
    pub name: &'a str,
    pub code: &'a str,
}

impl Dimension for Service<'_> {
    const TABLE: &'static str = "dim_servico";
    const KEY_COLUMN: &'static str = "id_servico";
    const LOOKUP_SQL: &'static str = "SELECT id_servico FROM dim_servico WHERE sigla_servico = $1";
    const INSERT_SQL: &'static str = "INSERT INTO dim_servico (nome_servico, sigla_servico) \
         VALUES ($1, $2) RETURNING id_servico";

    fn natural_key(&self) -> String {
        self.code.to_string()
    }

    fn bind_lookup<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query.bind(self.code)
    }

    fn bind_insert<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query.bind(self.name).bind(self.code)
    }
}

/// `dim_indicador` row, keyed on the indicator name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator<'a> {
    pub name: &'a str,
}

impl Dimension for Indicator<'_> {
    const TABLE: &'static str = "dim_indicador";
    const KEY_COLUMN: &'static str = "id_indicador";
    const LOOKUP_SQL: &'static str = "SELECT id_indicador FROM dim_indicador WHERE nome_indicador = $1";
    const INSERT_SQL: &'static str =
        "INSERT INTO dim_indicador (nome_indicador) VALUES ($1) RETURNING id_indicador";

    fn natural_key(&self) -> String {
        self.name.to_string()
    }

    fn bind_lookup<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query.bind(self.name)
    }

    fn bind_insert<'q>(&'q self, query: KeyQuery<'q>) -> KeyQuery<'q> {
        query.bind(self.name)
    }
}

/// Get-or-create front end over a [`Warehouse`].
///
/// Resolutions go through one warehouse session, one at a time, so two
/// requests for the same natural key can never race into duplicate rows.
/// Only keys from committed resolutions are cached.
pub struct Resolver<W> {
    warehouse: W,
    cache: HashMap<(&'static str, String), SurrogateKey>,
}

impl<W: Warehouse> Resolver<W> {
    pub fn new(warehouse: W) -> Self {
        Self {
            warehouse,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve<D: Dimension>(&mut self, record: &D) -> Result<SurrogateKey> {
        let cache_key = (D::TABLE, record.natural_key());
        if let Some(&key) = self.cache.get(&cache_key) {
            return Ok(key);
        }

        let key = self.warehouse.resolve(record).await?;
        debug!(
            table = D::TABLE,
            column = D::KEY_COLUMN,
            natural_key = %cache_key.1,
            %key,
            "resolved dimension key"
        );
        self.cache.insert(cache_key, key);
        Ok(key)
    }

    /// Derive the time row for `ano_mes` and resolve its key
    pub async fn time(&mut self, ano_mes: &str) -> Result<SurrogateKey> {
        let row = TimeDimension::derive(ano_mes)?;
        self.resolve(&row).await
    }

    pub async fn economic_group(&mut self, name: &str) -> Result<SurrogateKey> {
        self.resolve(&EconomicGroup { name }).await
    }

    pub async fn service(&mut self, name: &str, code: &str) -> Result<SurrogateKey> {
        self.resolve(&Service { name, code }).await
    }

    pub async fn indicator(&mut self, name: &str) -> Result<SurrogateKey> {
        self.resolve(&Indicator { name }).await
    }

    #[cfg(test)]
    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn warehouse_mut(&mut self) -> &mut W {
        &mut self.warehouse
    }

    pub fn into_inner(self) -> W {
        self.warehouse
    }
}
