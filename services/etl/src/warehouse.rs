//! Star schema storage: the [`Warehouse`] seam and its PostgreSQL backend.

use crate::config::DbConfig;
use crate::dimension::{Dimension, SurrogateKey};
use crate::error::{EtlError, Result};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{error, info, warn};

pub const FACT_TABLE: &str = "fact_indicador_desempenho";

/// PostgreSQL accepts at most this many bind parameters per statement
const BIND_LIMIT: usize = 65_535;
const FACT_COLUMNS: usize = 5;
/// Facts per INSERT statement
pub const FACT_CHUNK_ROWS: usize = BIND_LIMIT / FACT_COLUMNS;

/// One `fact_indicador_desempenho` row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactRow {
    pub time: SurrogateKey,
    pub economic_group: SurrogateKey,
    pub service: SurrogateKey,
    pub indicator: SurrogateKey,
    pub value: f64,
}

/// Transactional access to the dimension and fact tables.
///
/// Every `resolve` and every `insert_facts` call is its own transaction:
/// it commits before returning `Ok`, and leaves nothing behind on `Err`.
pub trait Warehouse {
    /// Return the surrogate key for `record`'s natural key, inserting the row
    /// when it does not exist yet.
    async fn resolve<D: Dimension>(&mut self, record: &D) -> Result<SurrogateKey>;

    /// Insert the whole batch or none of it. Returns the number of rows written.
    async fn insert_facts(&mut self, facts: &[FactRow]) -> Result<u64>;
}

/// Single-session PostgreSQL warehouse
pub struct PgWarehouse {
    conn: PgConnection,
}

impl PgWarehouse {
    /// Open the run's only session. Failure here aborts the whole run.
    pub async fn connect(db: &DbConfig, schema: &str) -> Result<Self> {
        let conn = PgConnection::connect_with(&db.connect_options(schema))
            .await
            .map_err(|source| EtlError::Connection {
                host: db.host.clone(),
                port: db.port,
                database: db.database.clone(),
                source,
            })?;

        info!(host = %db.host, database = %db.database, schema, "connected to PostgreSQL");
        Ok(Self { conn })
    }

    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            warn!("error while closing PostgreSQL connection: {}", e);
        } else {
            info!("PostgreSQL connection closed");
        }
    }
}

impl Warehouse for PgWarehouse {
    async fn resolve<D: Dimension>(&mut self, record: &D) -> Result<SurrogateKey> {
        let storage_error = |source: sqlx::Error| EtlError::Storage {
            table: D::TABLE,
            key: record.natural_key(),
            source,
        };

        let mut tx = self.conn.begin().await.map_err(storage_error)?;

        match lookup_or_insert(&mut *tx, record).await {
            Ok(id) => {
                tx.commit().await.map_err(storage_error)?;
                Ok(SurrogateKey(id))
            }
            Err(source) => {
                if let Err(e) = tx.rollback().await {
                    warn!(table = D::TABLE, "rollback failed: {}", e);
                }
                error!(
                    table = D::TABLE,
                    natural_key = %record.natural_key(),
                    "dimension lookup/insert failed, rolled back: {}",
                    source
                );
                Err(storage_error(source))
            }
        }
    }

    async fn insert_facts(&mut self, facts: &[FactRow]) -> Result<u64> {
        if facts.is_empty() {
            return Ok(0);
        }

        let storage_error = |source: sqlx::Error| EtlError::Storage {
            table: FACT_TABLE,
            key: format!("batch of {} rows", facts.len()),
            source,
        };

        let mut tx = self.conn.begin().await.map_err(storage_error)?;

        let mut inserted = 0;
        for chunk in facts.chunks(FACT_CHUNK_ROWS) {
            match fact_insert_query(chunk).build().execute(&mut *tx).await {
                Ok(done) => inserted += done.rows_affected(),
                Err(source) => {
                    if let Err(e) = tx.rollback().await {
                        warn!(table = FACT_TABLE, "rollback failed: {}", e);
                    }
                    error!(
                        table = FACT_TABLE,
                        rows = facts.len(),
                        "fact batch insert failed, rolled back: {}",
                        source
                    );
                    return Err(storage_error(source));
                }
            }
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(inserted)
    }
}

async fn lookup_or_insert<D: Dimension>(
    conn: &mut PgConnection,
    record: &D,
) -> std::result::Result<i32, sqlx::Error> {
    let existing = record
        .bind_lookup(sqlx::query_as(D::LOOKUP_SQL))
        .fetch_optional(&mut *conn)
        .await?;

    if let Some((id,)) = existing {
        return Ok(id);
    }

    let (id,) = record
        .bind_insert(sqlx::query_as(D::INSERT_SQL))
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Multi-row INSERT for one chunk of facts
fn fact_insert_query(chunk: &[FactRow]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO fact_indicador_desempenho \
         (id_tempo, id_grupo_economico, id_servico, id_indicador, valor) ",
    );
    builder.push_values(chunk, |mut row, fact| {
        row.push_bind(fact.time.0)
            .push_bind(fact.economic_group.0)
            .push_bind(fact.service.0)
            .push_bind(fact.indicator.0)
            .push_bind(fact.value);
    });
    builder
}
