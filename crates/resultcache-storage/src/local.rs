//! Local disk storage backend

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::backend::{validate_key, EntryMeta, EntryStore};
use crate::error::StorageError;

/// Local disk storage backend
///
/// Stores one file per entry, named after its key:
/// `<base_path>/entries/<key>`
///
/// Writes go through `<base_path>/tmp` and are renamed into place, so a
/// reader never observes a half-written entry.
pub struct LocalStore {
    base_path: PathBuf,
    entries_path: PathBuf,
    tmp_path: PathBuf,
    tmp_counter: AtomicU64,
}

impl LocalStore {
    /// Create a new local store, clearing temp files left by a previous run
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let entries_path = base_path.join("entries");
        let tmp_path = base_path.join("tmp");

        fs::create_dir_all(&entries_path).await?;
        if fs::try_exists(&tmp_path).await? {
            fs::remove_dir_all(&tmp_path).await?;
        }
        fs::create_dir_all(&tmp_path).await?;

        info!("Initialized local store at {:?}", base_path);

        Ok(Self {
            base_path,
            entries_path,
            tmp_path,
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Root directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file path for a key
    pub fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.entries_path.join(key))
    }

    fn next_tmp_path(&self) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.tmp_path.join(format!("{}.{}", std::process::id(), n))
    }
}

#[async_trait]
impl EntryStore for LocalStore {
    async fn list_entries(&self) -> Result<Vec<EntryMeta>, StorageError> {
        let mut dir = fs::read_dir(&self.entries_path).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 entry name {:?}", entry.file_name());
                continue;
            };
            if validate_key(&key).is_err() {
                continue;
            }

            // The entry may be deleted between listing and stat
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            if !metadata.is_file() {
                continue;
            }

            entries.push(EntryMeta {
                key,
                last_modified: DateTime::<Utc>::from(metadata.modified()?),
            });
        }

        Ok(entries)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.entry_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StorageError> {
        let path = self.entry_path(key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }

    async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.entry_path(key)?;
        debug!("Reading entry from {:?}", path);

        let data = fs::read(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;

        Ok(Bytes::from(data))
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        debug!("Writing {} bytes to {:?}", data.len(), path);

        let temp_path = self.next_tmp_path();
        fs::write(&temp_path, &data).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.entry_path(key)?;
        debug!("Deleting entry at {:?}", path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, SystemTime};

    async fn create_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let (_dir, store) = create_store().await;

        assert!(!store.exists("q1").await.unwrap());
        store.write("q1", Bytes::from_static(b"rows")).await.unwrap();

        assert!(store.exists("q1").await.unwrap());
        assert_eq!(store.read("q1").await.unwrap(), Bytes::from_static(b"rows"));

        assert!(store.delete("q1").await.unwrap());
        assert!(!store.delete("q1").await.unwrap());
        assert!(matches!(
            store.read("q1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_entries_reports_mtime() {
        let (_dir, store) = create_store().await;
        store.write("old", Bytes::from_static(b"a")).await.unwrap();
        store.write("new", Bytes::from_static(b"b")).await.unwrap();

        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        filetime::set_file_mtime(
            store.entry_path("old").unwrap(),
            FileTime::from_system_time(two_hours_ago),
        )
        .unwrap();

        let mut entries = store.list_entries().await.unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "new");
        assert_eq!(entries[1].key, "old");
        assert_eq!(
            entries[1].last_modified.timestamp(),
            DateTime::<Utc>::from(two_hours_ago).timestamp()
        );
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_last_modified_missing_entry() {
        let (_dir, store) = create_store().await;
        assert!(matches!(
            store.last_modified("missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_keys() {
        let (_dir, store) = create_store().await;
        assert!(matches!(
            store.write("../escape", Bytes::new()).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.exists("").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_get_or_populate_runs_provider_on_miss_only() {
        let (_dir, store) = create_store().await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let data = store
                .get_or_populate(
                    "q",
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(Bytes::from_static(b"computed"))
                    }),
                )
                .await
                .unwrap();
            assert_eq!(data, Bytes::from_static(b"computed"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_populate_propagates_provider_error() {
        let (_dir, store) = create_store().await;

        let provider = Box::pin(async { Err::<Bytes, _>(anyhow::anyhow!("query failed")) });
        let result = store.get_or_populate("q", provider).await;

        match result {
            Err(StorageError::Provider { key, source }) => {
                assert_eq!(key, "q");
                assert_eq!(source.to_string(), "query failed");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!store.exists("q").await.unwrap());
    }

    #[tokio::test]
    async fn test_new_clears_stale_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
        std::fs::write(dir.path().join("tmp").join("leftover"), b"x").unwrap();

        let store = LocalStore::new(dir.path()).await.unwrap();

        assert!(!dir.path().join("tmp").join("leftover").exists());
        assert!(store.list_entries().await.unwrap().is_empty());
    }
}
