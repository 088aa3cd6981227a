//! PostgreSQL-backed relational store: one hash-skip probe plus one bulk upsert per batch, per
//! data type (§4.6). Each of the four tables is `(hash TEXT NOT NULL, data_id TEXT PRIMARY KEY,
//! data JSONB NOT NULL)`, created idempotently at startup.

use crate::record::TableRecord;
use discogsography_common::DataType;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Errors a batch write can fail with, collapsed to the two kinds the batch processor cares
/// about: connection-shaped failures (mirroring the reference's `InterfaceError`/
/// `OperationalError`) that warrant re-queuing the whole batch, and everything else, which
/// only warrants a nack.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("postgres connection unavailable: {0}")]
    Transient(String),
    #[error("postgres write failed: {0}")]
    Other(String),
}

impl TableError {
    fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                TableError::Transient(err.to_string())
            }
            _ => TableError::Other(err.to_string()),
        }
    }
}

pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str, pool_size: u32) -> Result<Self, TableError> {
        let pool = PgPoolOptions::new().max_connections(pool_size).connect(dsn).await.map_err(TableError::classify)?;
        Ok(Self { pool })
    }

    /// `CREATE TABLE IF NOT EXISTS <type>(hash TEXT NOT NULL, data_id TEXT PRIMARY KEY, data JSONB NOT NULL)`
    /// for every data type, run once at startup (§3.4).
    pub async fn ensure_tables(&self) -> Result<(), TableError> {
        for data_type in DataType::all() {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {table} (hash TEXT NOT NULL, data_id TEXT PRIMARY KEY, data JSONB NOT NULL)",
                table = table_name(data_type)
            );
            sqlx::query(&ddl).execute(&self.pool).await.map_err(TableError::classify)?;
        }
        Ok(())
    }

    /// `SELECT data_id, hash FROM <type> WHERE data_id = ANY($1)` (§4.6 step 1).
    async fn fetch_hashes(&self, data_type: DataType, ids: &[String]) -> Result<HashMap<String, String>, TableError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = format!("SELECT data_id, hash FROM {table} WHERE data_id = ANY($1)", table = table_name(data_type));
        let rows: Vec<PgRow> = sqlx::query(&query).bind(ids).fetch_all(&self.pool).await.map_err(TableError::classify)?;

        let mut hashes = HashMap::with_capacity(rows.len());
        for row in rows {
            let data_id: String = row.try_get("data_id").map_err(TableError::classify)?;
            let hash: String = row.try_get("hash").map_err(TableError::classify)?;
            hashes.insert(data_id, hash);
        }
        Ok(hashes)
    }

    /// Filters `records` to those whose hash changed, then bulk-upserts the survivors inside
    /// one transaction via `INSERT ... ON CONFLICT (data_id) DO UPDATE` (§4.6 steps 2-3).
    /// Returns the number of rows actually written.
    pub async fn upsert(&self, data_type: DataType, records: &[TableRecord]) -> Result<usize, TableError> {
        let ids: Vec<String> = records.iter().map(|r| r.data_id.clone()).collect();
        let existing = self.fetch_hashes(data_type, &ids).await?;

        let to_write: Vec<&TableRecord> = records.iter().filter(|r| existing.get(&r.data_id) != Some(&r.sha256)).collect();
        if to_write.is_empty() {
            debug!("⏩ All {} in batch already up to date", data_type);
            return Ok(0);
        }

        let mut txn: Transaction<'_, Postgres> = self.pool.begin().await.map_err(TableError::classify)?;
        let query = format!(
            "INSERT INTO {table} (hash, data_id, data) VALUES ($1, $2, $3) \
             ON CONFLICT (data_id) DO UPDATE SET hash = EXCLUDED.hash, data = EXCLUDED.data",
            table = table_name(data_type)
        );
        for record in &to_write {
            sqlx::query(&query)
                .bind(&record.sha256)
                .bind(&record.data_id)
                .bind(&record.data)
                .execute(&mut *txn)
                .await
                .map_err(TableError::classify)?;
        }
        txn.commit().await.map_err(TableError::classify)?;

        Ok(to_write.len())
    }
}

/// Table name is always one of the four fixed [`DataType`] spellings, never user input, so
/// direct interpolation into DDL/DML is safe.
fn table_name(data_type: DataType) -> &'static str {
    data_type.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_match_data_type_spelling() {
        assert_eq!(table_name(DataType::Artists), "artists");
        assert_eq!(table_name(DataType::Releases), "releases");
    }
}
