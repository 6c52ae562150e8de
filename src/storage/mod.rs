//! Durable storage for execution results.
//!
//! Results are serialized, compressed, and written to a backend under a
//! content-derived key (hex SHA-256 of the execution id). Backends are
//! interchangeable behind [`StorageBackend`]; an in-memory TTL cache sits in
//! front of reads.

mod cache;
mod compression;
mod filesystem;
mod serialization;
mod sqlite;

pub use cache::ResultCache;
pub use compression::{compress, decompress};
pub use filesystem::FileSystemBackend;
pub use serialization::{deserialize, serialize};
pub use sqlite::SqliteBackend;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, StorageConfig};
use crate::error::{StorageError, StorageResult};

/// Which backend persists results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendType {
    Database,
    FileSystem,
}

impl std::fmt::Display for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendType::Database => write!(f, "database"),
            StorageBackendType::FileSystem => write!(f, "file_system"),
        }
    }
}

impl std::str::FromStr for StorageBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "database" | "db" | "sqlite" => Ok(StorageBackendType::Database),
            "file_system" | "filesystem" | "fs" => Ok(StorageBackendType::FileSystem),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Payload serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    /// Default format.
    Json,
    /// Legacy binary object format. Reading old stores only; warns on every use.
    LegacyBinary,
    /// MessagePack, available with the `msgpack` feature.
    Msgpack,
}

impl SerializationFormat {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializationFormat::Json => "json",
            SerializationFormat::LegacyBinary => "legacy_binary",
            SerializationFormat::Msgpack => "msgpack",
        }
    }
}

impl std::fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SerializationFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(SerializationFormat::Json),
            "legacy_binary" | "pickle" => Ok(SerializationFormat::LegacyBinary),
            "msgpack" => Ok(SerializationFormat::Msgpack),
            _ => Err(format!("Unknown serialization format: {}", s)),
        }
    }
}

/// Payload compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    None,
    Gzip,
    Zlib,
    Lz4,
}

impl CompressionType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Zlib => "zlib",
            CompressionType::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CompressionType::None),
            "gzip" => Ok(CompressionType::Gzip),
            "zlib" => Ok(CompressionType::Zlib),
            "lz4" => Ok(CompressionType::Lz4),
            _ => Err(format!("Unknown compression type: {}", s)),
        }
    }
}

/// Metadata for one stored result. Searchable without touching the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    /// Hex SHA-256 of the execution id.
    pub key: String,
    pub execution_id: String,
    pub query_id: String,
    pub serialization: SerializationFormat,
    pub compression: CompressionType,
    /// Serialized size before compression.
    pub original_size: u64,
    /// Bytes actually stored.
    pub compressed_size: u64,
    /// `compressed_size / original_size`; below 1.0 means space was saved.
    pub compression_ratio: f64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
}

/// Criteria for [`ResultStorageEngine::search_results`]. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub query_id: Option<String>,
    pub execution_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SearchFilter {
    /// Match results of one query.
    pub fn for_query(query_id: impl Into<String>) -> Self {
        Self {
            query_id: Some(query_id.into()),
            ..Default::default()
        }
    }

    /// Only results created strictly before `at`.
    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    /// Only results created at or after `at`.
    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    /// Cap the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every set criterion (ignores `limit`).
    pub fn matches(&self, record: &StoredResult) -> bool {
        self.query_id.as_ref().map_or(true, |q| &record.query_id == q)
            && self
                .execution_id
                .as_ref()
                .map_or(true, |e| &record.execution_id == e)
            && self.created_after.map_or(true, |t| record.created_at >= t)
            && self.created_before.map_or(true, |t| record.created_at < t)
    }
}

/// Aggregate storage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageAnalytics {
    pub total_results: usize,
    pub total_original_bytes: u64,
    pub total_stored_bytes: u64,
    pub average_compression_ratio: f64,
    pub space_saved_bytes: u64,
    pub by_serialization: HashMap<String, usize>,
    pub by_compression: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub cached_entries: usize,
}

/// Persistence contract shared by every backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert or replace a record and its payload.
    async fn put(&self, record: &StoredResult, blob: &[u8]) -> StorageResult<()>;

    /// Fetch a record and its payload.
    async fn get(&self, key: &str) -> StorageResult<Option<(StoredResult, Vec<u8>)>>;

    /// Remove a record. Returns whether it existed.
    async fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Metadata matching the filter, newest first.
    async fn list_metadata(&self, filter: &SearchFilter) -> StorageResult<Vec<StoredResult>>;

    /// Update the last-access time.
    async fn touch(&self, key: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Backend kind, for logging.
    fn kind(&self) -> StorageBackendType;
}

/// Content key for an identifier: lowercase hex SHA-256, 64 characters.
pub fn storage_key(identifier: &str) -> String {
    hex::encode(Sha256::digest(identifier.as_bytes()))
}

/// Whether `key` has the shape produced by [`storage_key`].
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Backend-agnostic result store with serialization, compression, and caching.
#[derive(Clone)]
pub struct ResultStorageEngine {
    backend: Arc<dyn StorageBackend>,
    serialization: SerializationFormat,
    compression: CompressionType,
    cache: Option<ResultCache>,
}

impl ResultStorageEngine {
    /// Create an engine over an existing backend.
    pub fn new(backend: Arc<dyn StorageBackend>, config: &StorageConfig) -> Self {
        if config.serialization == SerializationFormat::LegacyBinary {
            warn!("Result storage configured with the legacy binary format; prefer json");
        }
        Self {
            backend,
            serialization: config.serialization,
            compression: config.compression,
            cache: config
                .cache_enabled
                .then(|| ResultCache::new(config.cache_ttl())),
        }
    }

    /// Create the configured backend and wrap it.
    pub async fn from_config(
        config: &StorageConfig,
        database: &DatabaseConfig,
    ) -> StorageResult<Self> {
        let backend: Arc<dyn StorageBackend> = match config.backend {
            StorageBackendType::Database => Arc::new(SqliteBackend::new(database).await?),
            StorageBackendType::FileSystem => {
                Arc::new(FileSystemBackend::new(&config.base_path).await?)
            }
        };
        info!(
            backend = %config.backend,
            serialization = %config.serialization,
            compression = %config.compression,
            "Result storage initialized"
        );
        Ok(Self::new(backend, config))
    }

    /// Serialize, compress, and persist a result. Returns its key.
    pub async fn store(
        &self,
        execution_id: &str,
        query_id: &str,
        data: &serde_json::Value,
    ) -> StorageResult<String> {
        let key = storage_key(execution_id);
        let serialized = serialize(self.serialization, data)?;
        let blob = compress(self.compression, &serialized)?;

        let original_size = serialized.len() as u64;
        let compressed_size = blob.len() as u64;
        let record = StoredResult {
            key: key.clone(),
            execution_id: execution_id.to_string(),
            query_id: query_id.to_string(),
            serialization: self.serialization,
            compression: self.compression,
            original_size,
            compressed_size,
            compression_ratio: ratio(original_size, compressed_size),
            created_at: Utc::now(),
            accessed_at: None,
        };

        self.backend.put(&record, &blob).await?;

        if let Some(cache) = &self.cache {
            cache.insert(&key, data.clone());
        }

        debug!(
            key = %key,
            execution_id = %execution_id,
            original_size,
            compressed_size,
            "Stored execution result"
        );
        Ok(key)
    }

    /// Load a result by key.
    pub async fn retrieve(&self, key: &str) -> StorageResult<serde_json::Value> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(key)) {
            debug!(key = %key, "Result cache hit");
            return Ok(cached);
        }

        let (record, blob) = self
            .backend
            .get(key)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;

        // Decode with the format the record was written in, not the current config.
        let serialized = decompress(record.compression, &blob)?;
        let value = deserialize(record.serialization, &serialized)?;

        if let Err(e) = self.backend.touch(key, Utc::now()).await {
            warn!(key = %key, error = %e, "Failed to update result access time");
        }
        if let Some(cache) = &self.cache {
            cache.insert(key, value.clone());
        }

        Ok(value)
    }

    /// Remove a result. Removing an absent key succeeds.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        if let Some(cache) = &self.cache {
            cache.invalidate(key);
        }
        let existed = self.backend.remove(key).await?;
        debug!(key = %key, existed, "Deleted execution result");
        Ok(())
    }

    /// Whether a result exists in the backend.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.backend.get(key).await?.is_some())
    }

    /// Search stored metadata.
    pub async fn search_results(&self, filter: &SearchFilter) -> StorageResult<Vec<StoredResult>> {
        self.backend.list_metadata(filter).await
    }

    /// Aggregate counts, sizes, and compression ratio.
    pub async fn get_storage_analytics(&self) -> StorageResult<StorageAnalytics> {
        let records = self.backend.list_metadata(&SearchFilter::default()).await?;
        let mut analytics = StorageAnalytics {
            total_results: records.len(),
            cached_entries: self.cache.as_ref().map_or(0, ResultCache::len),
            ..Default::default()
        };

        let mut ratio_sum = 0.0;
        for record in &records {
            analytics.total_original_bytes += record.original_size;
            analytics.total_stored_bytes += record.compressed_size;
            ratio_sum += record.compression_ratio;
            *analytics
                .by_serialization
                .entry(record.serialization.to_string())
                .or_insert(0) += 1;
            *analytics
                .by_compression
                .entry(record.compression.to_string())
                .or_insert(0) += 1;
            analytics.oldest = Some(
                analytics
                    .oldest
                    .map_or(record.created_at, |t| t.min(record.created_at)),
            );
            analytics.newest = Some(
                analytics
                    .newest
                    .map_or(record.created_at, |t| t.max(record.created_at)),
            );
        }

        if !records.is_empty() {
            analytics.average_compression_ratio = ratio_sum / records.len() as f64;
        }
        analytics.space_saved_bytes = analytics
            .total_original_bytes
            .saturating_sub(analytics.total_stored_bytes);

        Ok(analytics)
    }

    /// Delete results older than `max_age`. Returns how many were removed.
    pub async fn cleanup_expired(&self, max_age: Duration) -> StorageResult<usize> {
        let age = chrono::Duration::from_std(max_age).map_err(|e| StorageError::Validation {
            message: format!("max_age out of range: {}", e),
        })?;
        let filter = SearchFilter::default().created_before(Utc::now() - age);
        let expired = self.backend.list_metadata(&filter).await?;

        let mut removed = 0;
        for record in &expired {
            self.delete(&record.key).await?;
            removed += 1;
        }

        if let Some(cache) = &self.cache {
            cache.purge_expired();
        }
        if removed > 0 {
            info!(removed, "Removed expired execution results");
        }
        Ok(removed)
    }

    /// Format used for new writes.
    pub fn serialization(&self) -> SerializationFormat {
        self.serialization
    }

    /// Compression used for new writes.
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Backend kind.
    pub fn backend_kind(&self) -> StorageBackendType {
        self.backend.kind()
    }
}

fn ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        1.0
    } else {
        compressed as f64 / original as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_shape() {
        let key = storage_key("exec-123");
        assert!(is_valid_key(&key));
        assert_eq!(key, storage_key("exec-123"));
        assert_ne!(key, storage_key("exec-124"));
        // sha256("abc")
        assert_eq!(
            storage_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("../../etc/passwd"));
        assert!(!is_valid_key(&"A".repeat(64)));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(
            "filesystem".parse::<StorageBackendType>().unwrap(),
            StorageBackendType::FileSystem
        );
        assert_eq!(
            "pickle".parse::<SerializationFormat>().unwrap(),
            SerializationFormat::LegacyBinary
        );
        assert_eq!("LZ4".parse::<CompressionType>().unwrap(), CompressionType::Lz4);
        assert!("brotli".parse::<CompressionType>().is_err());
    }

    #[test]
    fn test_search_filter_matches() {
        let now = Utc::now();
        let record = StoredResult {
            key: storage_key("e1"),
            execution_id: "e1".into(),
            query_id: "q1".into(),
            serialization: SerializationFormat::Json,
            compression: CompressionType::None,
            original_size: 10,
            compressed_size: 10,
            compression_ratio: 1.0,
            created_at: now,
            accessed_at: None,
        };
        assert!(SearchFilter::default().matches(&record));
        assert!(SearchFilter::for_query("q1").matches(&record));
        assert!(!SearchFilter::for_query("q2").matches(&record));
        assert!(!SearchFilter::default().created_before(now).matches(&record));
        assert!(SearchFilter::default().created_after(now).matches(&record));
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(0, 0), 1.0);
        assert_eq!(ratio(100, 25), 0.25);
    }
}
