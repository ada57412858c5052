//! Thread routing cache: (group_id, sender) -> thread_id, persisted to a JSON file.
//!
//! The in-memory map is authoritative. Every assignment rewrites the whole file
//! (temp file + rename) while the write lock is held, so saves are ordered and a
//! crash mid-write leaves the previous file intact. An advisory lock on
//! `<file>.lock` keeps a second process from opening the same cache.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// File name used by [`ThreadCache::in_dir`].
pub const CACHE_FILE_NAME: &str = "topic_cache.json";

/// group_id -> sender -> thread_id. Serialized as `{"<group>": {"<sender>": id}}`.
pub type ThreadMap = BTreeMap<i64, BTreeMap<String, i64>>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("thread cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("thread cache at {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("thread cache at {0} is in use by another process")]
    Locked(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Durable, concurrency-safe store of thread assignments.
pub struct ThreadCache {
    path: PathBuf,
    groups: RwLock<ThreadMap>,
    _lock: std::fs::File,
}

impl ThreadCache {
    /// Open `dir/topic_cache.json`, creating `dir` if needed.
    pub async fn in_dir(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        Self::open(dir.as_ref().join(CACHE_FILE_NAME)).await
    }

    /// Open the cache backed by `path`. A missing file is an empty cache; malformed content is an error.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let lock_path = sibling(&path, "lock");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(io_err(&lock_path))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(CacheError::Locked(path));
        }

        let groups = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => ThreadMap::new(),
            Ok(s) => serde_json::from_str(&s).map_err(|source| CacheError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("thread cache not found, starting empty: {}", path.display());
                ThreadMap::new()
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        let count: usize = groups.values().map(|m| m.len()).sum();
        log::info!("loaded {} thread assignment(s) from {}", count, path.display());

        Ok(Self {
            path,
            groups: RwLock::new(groups),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Thread recorded for (group_id, sender), if any.
    pub async fn lookup(&self, group_id: i64, sender: &str) -> Option<i64> {
        let groups = self.groups.read().await;
        groups.get(&group_id).and_then(|m| m.get(sender)).copied()
    }

    /// Record the thread for (group_id, sender) and persist the full mapping.
    /// The in-memory entry is updated even when the write fails.
    pub async fn assign(&self, group_id: i64, sender: &str, thread_id: i64) -> Result<(), CacheError> {
        let mut groups = self.groups.write().await;
        groups
            .entry(group_id)
            .or_default()
            .insert(sender.to_string(), thread_id);
        self.save(&groups).await
    }

    /// Reverse lookup: which sender owns `thread_id` in `group_id`.
    pub async fn sender_for_thread(&self, group_id: i64, thread_id: i64) -> Option<String> {
        let groups = self.groups.read().await;
        groups
            .get(&group_id)?
            .iter()
            .find(|(_, id)| **id == thread_id)
            .map(|(sender, _)| sender.clone())
    }

    /// Total number of recorded assignments across groups.
    pub async fn len(&self) -> usize {
        self.groups.read().await.values().map(|m| m.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of the whole mapping.
    pub async fn snapshot(&self) -> ThreadMap {
        self.groups.read().await.clone()
    }

    async fn save(&self, groups: &ThreadMap) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(groups).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let tmp = sibling(&self.path, "tmp");
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err(&tmp))?;
        file.write_all(json.as_bytes()).await.map_err(io_err(&tmp))?;
        file.sync_all().await.map_err(io_err(&tmp))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_err(&self.path))
    }
}

/// `topic_cache.json` -> `topic_cache.json.<ext>`
fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("bridge-cache-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = temp_dir();
        let cache = ThreadCache::in_dir(&dir).await.unwrap();
        assert!(cache.is_empty().await);
        assert_eq!(cache.lookup(-100, "alice").await, None);
        assert!(!cache.path().exists());
    }

    #[tokio::test]
    async fn assign_then_lookup() {
        let cache = ThreadCache::in_dir(temp_dir()).await.unwrap();
        cache.assign(-100, "alice", 7).await.unwrap();
        assert_eq!(cache.lookup(-100, "alice").await, Some(7));
        assert_eq!(cache.lookup(-100, "bob").await, None);
        assert_eq!(cache.lookup(-200, "alice").await, None);
        assert_eq!(cache.sender_for_thread(-100, 7).await.as_deref(), Some("alice"));
        assert_eq!(cache.sender_for_thread(-100, 8).await, None);
    }

    #[tokio::test]
    async fn reload_yields_identical_mapping() {
        let dir = temp_dir();
        let before = {
            let cache = ThreadCache::in_dir(&dir).await.unwrap();
            cache.assign(-100, "alice", 7).await.unwrap();
            cache.assign(-100, "bob", 9).await.unwrap();
            cache.assign(-200, "+15550001111", 3).await.unwrap();
            cache.snapshot().await
        };
        let cache = ThreadCache::in_dir(&dir).await.unwrap();
        assert_eq!(cache.snapshot().await, before);
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn file_is_pretty_json_keyed_by_group() {
        let dir = temp_dir();
        let cache = ThreadCache::in_dir(&dir).await.unwrap();
        cache.assign(-100, "alice", 7).await.unwrap();
        let text = std::fs::read_to_string(dir.join(CACHE_FILE_NAME)).unwrap();
        assert!(text.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["-100"]["alice"], 7);
        assert!(!dir.join("topic_cache.json.tmp").exists());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CACHE_FILE_NAME), "{ not json").unwrap();
        let err = ThreadCache::in_dir(&dir).await.err().expect("malformed cache must fail");
        assert!(matches!(err, CacheError::Parse { .. }));
    }

    #[tokio::test]
    async fn second_open_is_locked() {
        let dir = temp_dir();
        let _first = ThreadCache::in_dir(&dir).await.unwrap();
        let err = ThreadCache::in_dir(&dir).await.err().expect("second open must fail");
        assert!(matches!(err, CacheError::Locked(_)));
    }

    #[tokio::test]
    async fn write_failure_still_updates_memory() {
        let dir = temp_dir();
        let cache = ThreadCache::in_dir(&dir).await.unwrap();
        // A directory where the temp file should go makes File::create fail.
        std::fs::create_dir_all(dir.join("topic_cache.json.tmp")).unwrap();
        assert!(cache.assign(-100, "alice", 7).await.is_err());
        assert_eq!(cache.lookup(-100, "alice").await, Some(7));
    }

    #[tokio::test]
    async fn concurrent_assigns_are_all_persisted() {
        let dir = temp_dir();
        let cache = Arc::new(ThreadCache::in_dir(&dir).await.unwrap());
        let mut handles = Vec::new();
        for i in 0..20i64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.assign(-100, &format!("sender-{}", i), i).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let expected = cache.snapshot().await;
        drop(cache);
        let reloaded = ThreadCache::in_dir(&dir).await.unwrap();
        assert_eq!(reloaded.snapshot().await, expected);
        assert_eq!(reloaded.len().await, 20);
    }
}
