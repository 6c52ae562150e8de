use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use super::{is_valid_key, SearchFilter, StorageBackend, StorageBackendType, StoredResult};
use crate::error::{StorageError, StorageResult};

const DATA_EXT: &str = "dat";
const META_SUFFIX: &str = ".meta.json";

type KeyLocks = DashMap<String, Arc<Mutex<()>>>;

/// Lock table shared by every backend opened on the same directory.
fn shared_key_locks(dir: &Path) -> Arc<KeyLocks> {
    static REGISTRY: OnceLock<DashMap<PathBuf, Arc<KeyLocks>>> = OnceLock::new();
    REGISTRY
        .get_or_init(DashMap::new)
        .entry(dir.to_path_buf())
        .or_insert_with(|| Arc::new(DashMap::new()))
        .clone()
}

/// One payload file plus one JSON metadata sidecar per result:
/// `<base>/<key>.dat` and `<base>/<key>.meta.json`.
///
/// Every operation on a key holds that key's lock, so a reader never sees a
/// payload and sidecar from different writes and `touch` never rewrites a
/// sidecar that a concurrent `put` has replaced. Backends opened on the same
/// directory share one lock table.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    base_path: PathBuf,
    key_locks: Arc<KeyLocks>,
}

impl FileSystemBackend {
    /// Use `base_path`, creating it if needed.
    pub async fn new(base_path: impl AsRef<Path>) -> StorageResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| StorageError::Backend {
                message: format!(
                    "Failed to create storage directory {}: {}",
                    base_path.display(),
                    e
                ),
            })?;
        let canonical = fs::canonicalize(&base_path)
            .await
            .unwrap_or_else(|_| base_path.clone());
        info!(path = %base_path.display(), "File system result storage ready");
        Ok(Self {
            key_locks: shared_key_locks(&canonical),
            base_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self
            .key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for `key` once nobody else holds or waits on it.
    fn release_key(&self, key: &str) {
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", key, DATA_EXT))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", key, META_SUFFIX))
    }

    async fn read_meta(&self, key: &str) -> StorageResult<Option<StoredResult>> {
        match fs::read(self.meta_path(key)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Validation {
                    message: format!("Corrupt metadata for {}: {}", key, e),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, record: &StoredResult) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(record).map_err(|e| StorageError::Serialization {
            format: "json".into(),
            message: e.to_string(),
        })?;
        write_atomic(&self.meta_path(&record.key), &json).await
    }
}

/// Write to a uniquely named sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StorageBackend for FileSystemBackend {
    async fn put(&self, record: &StoredResult, blob: &[u8]) -> StorageResult<()> {
        if !is_valid_key(&record.key) {
            return Err(StorageError::Validation {
                message: format!("Invalid storage key: {}", record.key),
            });
        }
        let _guard = self.lock_key(&record.key).await;
        // Payload first so listed metadata always has data behind it.
        write_atomic(&self.data_path(&record.key), blob).await?;
        self.write_meta(record).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<(StoredResult, Vec<u8>)>> {
        if !is_valid_key(key) {
            return Ok(None);
        }
        let _guard = self.lock_key(key).await;
        let Some(record) = self.read_meta(key).await? else {
            return Ok(None);
        };
        match fs::read(self.data_path(key)).await {
            Ok(blob) => Ok(Some((record, blob))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key = %key, "Metadata present without payload");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        if !is_valid_key(key) {
            return Ok(false);
        }
        let guard = self.lock_key(key).await;
        let meta = remove_if_present(&self.meta_path(key)).await;
        let data = remove_if_present(&self.data_path(key)).await;
        drop(guard);
        self.release_key(key);
        Ok(meta? || data?)
    }

    async fn list_metadata(&self, filter: &SearchFilter) -> StorageResult<Vec<StoredResult>> {
        let mut results = Vec::new();
        let mut dir = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(|n| n.strip_suffix(META_SUFFIX)) else {
                continue;
            };
            if !is_valid_key(key) {
                continue;
            }
            match self.read_meta(key).await {
                Ok(Some(record)) if filter.matches(&record) => results.push(record),
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable metadata"),
            }
        }

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>) -> StorageResult<()> {
        if !is_valid_key(key) {
            return Ok(());
        }
        let _guard = self.lock_key(key).await;
        if let Some(mut record) = self.read_meta(key).await? {
            record.accessed_at = Some(at);
            self.write_meta(&record).await?;
        }
        Ok(())
    }

    fn kind(&self) -> StorageBackendType {
        StorageBackendType::FileSystem
    }
}
