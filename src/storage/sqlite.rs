use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::info;

use super::{SearchFilter, StorageBackend, StorageBackendType, StoredResult};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS stored_results (
        key TEXT PRIMARY KEY,
        execution_id TEXT NOT NULL,
        query_id TEXT NOT NULL,
        payload BLOB NOT NULL,
        serialization TEXT NOT NULL,
        compression TEXT NOT NULL,
        original_size INTEGER NOT NULL,
        compressed_size INTEGER NOT NULL,
        compression_ratio REAL NOT NULL,
        created_at TEXT NOT NULL,
        accessed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_stored_results_query_id ON stored_results(query_id)",
    "CREATE INDEX IF NOT EXISTS idx_stored_results_created_at ON stored_results(created_at)",
];

const METADATA_COLUMNS: &str = "key, execution_id, query_id, serialization, compression, \
     original_size, compressed_size, compression_ratio, created_at, accessed_at";

/// SQLite-backed result storage
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the database file named in the config
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let backend = Self { pool };
        backend.create_schema().await?;

        Ok(backend)
    }

    /// Private in-memory database. One connection, since every connection
    /// to `:memory:` would otherwise see its own empty database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let backend = Self { pool };
        backend.create_schema().await?;

        Ok(backend)
    }

    async fn create_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Result storage schema ready");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn put(&self, record: &StoredResult, blob: &[u8]) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stored_results (key, execution_id, query_id, payload, serialization,
                compression, original_size, compressed_size, compression_ratio, created_at, accessed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                execution_id = excluded.execution_id,
                query_id = excluded.query_id,
                payload = excluded.payload,
                serialization = excluded.serialization,
                compression = excluded.compression,
                original_size = excluded.original_size,
                compressed_size = excluded.compressed_size,
                compression_ratio = excluded.compression_ratio,
                created_at = excluded.created_at,
                accessed_at = excluded.accessed_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.execution_id)
        .bind(&record.query_id)
        .bind(blob)
        .bind(record.serialization.as_str())
        .bind(record.compression.as_str())
        .bind(to_i64(record.original_size))
        .bind(to_i64(record.compressed_size))
        .bind(record.compression_ratio)
        .bind(timestamp(&record.created_at))
        .bind(record.accessed_at.as_ref().map(timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<(StoredResult, Vec<u8>)>> {
        let row: Option<PayloadRow> = sqlx::query_as(&format!(
            "SELECT {}, payload FROM stored_results WHERE key = ?",
            METADATA_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let payload = r.payload;
            r.metadata.try_into().map(|record| (record, payload))
        })
        .transpose()
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM stored_results WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_metadata(&self, filter: &SearchFilter) -> StorageResult<Vec<StoredResult>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM stored_results WHERE 1 = 1",
            METADATA_COLUMNS
        ));

        if let Some(query_id) = &filter.query_id {
            builder.push(" AND query_id = ").push_bind(query_id.clone());
        }
        if let Some(execution_id) = &filter.execution_id {
            builder
                .push(" AND execution_id = ")
                .push_bind(execution_id.clone());
        }
        if let Some(after) = &filter.created_after {
            builder.push(" AND created_at >= ").push_bind(timestamp(after));
        }
        if let Some(before) = &filter.created_before {
            builder.push(" AND created_at < ").push_bind(timestamp(before));
        }
        builder.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(to_i64(limit as u64));
        }

        let rows: Vec<MetadataRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(StoredResult::try_from).collect()
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query("UPDATE stored_results SET accessed_at = ? WHERE key = ?")
            .bind(timestamp(&at))
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn kind(&self) -> StorageBackendType {
        StorageBackendType::Database
    }
}

/// Fixed-width UTC timestamps so text comparison orders chronologically.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Validation {
            message: format!("Invalid stored timestamp '{}': {}", value, e),
        })
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct MetadataRow {
    key: String,
    execution_id: String,
    query_id: String,
    serialization: String,
    compression: String,
    original_size: i64,
    compressed_size: i64,
    compression_ratio: f64,
    created_at: String,
    accessed_at: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PayloadRow {
    #[sqlx(flatten)]
    metadata: MetadataRow,
    payload: Vec<u8>,
}

impl TryFrom<MetadataRow> for StoredResult {
    type Error = StorageError;

    fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
        Ok(Self {
            serialization: row
                .serialization
                .parse()
                .map_err(|message| StorageError::Validation { message })?,
            compression: row
                .compression
                .parse()
                .map_err(|message| StorageError::Validation { message })?,
            original_size: u64::try_from(row.original_size).unwrap_or(0),
            compressed_size: u64::try_from(row.compressed_size).unwrap_or(0),
            compression_ratio: row.compression_ratio,
            created_at: parse_timestamp(&row.created_at)?,
            accessed_at: row.accessed_at.as_deref().map(parse_timestamp).transpose()?,
            key: row.key,
            execution_id: row.execution_id,
            query_id: row.query_id,
        })
    }
}
