//! In-process remote store
//!
//! [`InMemoryRemoteStore`] implements the [`IRemoteStore`] port against a
//! map held in memory. It backs the daemon's `memory` adapter (a loopback
//! remote for local smoke runs) and the engine's integration tests, where
//! its failure-injection queue simulates flaky networks.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use driftsync_core::domain::newtypes::{Checksum, LocalPath, RemotePath};
use driftsync_core::ports::remote_store::{
    IRemoteStore, RemoteChange, RemoteEntry, RemoteStoreError,
};

/// One stored remote file or directory
#[derive(Debug, Clone)]
struct StoredEntry {
    data: Vec<u8>,
    modified: DateTime<Utc>,
    checksum: Option<Checksum>,
    is_directory: bool,
}

/// Shared mutable state behind one mutex; operations are short and the
/// store is an in-process stand-in, so a single lock is fine.
#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, StoredEntry>,
    /// Deletion markers so `changes_since` can report removals
    tombstones: HashMap<String, DateTime<Utc>>,
    /// Errors to return before executing the next operations (tests)
    failure_queue: VecDeque<RemoteStoreError>,
    /// Errors consumed only by `download` calls (tests)
    download_failure_queue: VecDeque<RemoteStoreError>,
}

/// In-memory implementation of the remote file-store port
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    inner: Mutex<Inner>,
}

fn sha256_of(data: &[u8]) -> Checksum {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest: [u8; 32] = hasher.finalize().into();
    Checksum::from_digest(&digest)
}

impl InMemoryRemoteStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a remote file directly, bypassing upload
    pub fn put_file(&self, path: &RemotePath, data: &[u8], modified: DateTime<Utc>) {
        let checksum = sha256_of(data);
        let mut inner = self.inner.lock().unwrap();
        inner.tombstones.remove(path.as_str());
        inner.entries.insert(
            path.as_str().to_string(),
            StoredEntry {
                data: data.to_vec(),
                modified,
                checksum: Some(checksum),
                is_directory: false,
            },
        );
    }

    /// Seeds a remote directory directly
    pub fn put_directory(&self, path: &RemotePath, modified: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.tombstones.remove(path.as_str());
        inner.entries.insert(
            path.as_str().to_string(),
            StoredEntry {
                data: Vec::new(),
                modified,
                checksum: None,
                is_directory: true,
            },
        );
    }

    /// Returns a remote file's content, if present
    pub fn file_data(&self, path: &RemotePath) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get(path.as_str())
            .map(|e| e.data.clone())
    }

    /// Returns true if the path exists remotely
    pub fn has_file(&self, path: &RemotePath) -> bool {
        self.inner.lock().unwrap().entries.contains_key(path.as_str())
    }

    /// Number of stored entries
    pub fn entry_count(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Queues an error to be returned before the next operation executes
    ///
    /// Each queued error consumes one operation call; queue three transient
    /// errors to exhaust a default retry policy.
    pub fn inject_failure(&self, error: RemoteStoreError) {
        self.inner.lock().unwrap().failure_queue.push_back(error);
    }

    /// Queues an error to be returned by upcoming `download` calls only
    pub fn inject_download_failure(&self, error: RemoteStoreError) {
        self.inner
            .lock()
            .unwrap()
            .download_failure_queue
            .push_back(error);
    }

    fn take_injected_failure(&self) -> Option<RemoteStoreError> {
        self.inner.lock().unwrap().failure_queue.pop_front()
    }

    fn take_injected_download_failure(&self) -> Option<RemoteStoreError> {
        self.inner.lock().unwrap().download_failure_queue.pop_front()
    }
}

#[async_trait::async_trait]
impl IRemoteStore for InMemoryRemoteStore {
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteStoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let prefix = if path.as_str() == "/" {
            "/".to_string()
        } else {
            format!("{}/", path.as_str())
        };

        let inner = self.inner.lock().unwrap();
        let entries = inner
            .entries
            .iter()
            .filter(|(p, _)| {
                // Direct children only
                p.strip_prefix(&prefix)
                    .map(|rest| !rest.is_empty() && !rest.contains('/'))
                    .unwrap_or(false)
            })
            .map(|(p, e)| RemoteEntry {
                path: RemotePath::new(p.clone()).expect("stored paths are valid"),
                size: e.data.len() as u64,
                modified: e.modified,
                checksum: e.checksum.clone(),
                is_directory: e.is_directory,
            })
            .collect();

        Ok(entries)
    }

    async fn upload(
        &self,
        local: &LocalPath,
        remote: &RemotePath,
    ) -> Result<RemoteEntry, RemoteStoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let data = tokio::fs::read(local.as_path()).await?;
        let checksum = sha256_of(&data);
        let modified = Utc::now();
        let size = data.len() as u64;

        debug!(local = %local, remote = %remote, size, "memory remote: upload");

        let mut inner = self.inner.lock().unwrap();
        inner.tombstones.remove(remote.as_str());
        inner.entries.insert(
            remote.as_str().to_string(),
            StoredEntry {
                data,
                modified,
                checksum: Some(checksum.clone()),
                is_directory: false,
            },
        );

        Ok(RemoteEntry {
            path: remote.clone(),
            size,
            modified,
            checksum: Some(checksum),
            is_directory: false,
        })
    }

    async fn download(
        &self,
        remote: &RemotePath,
        local: &LocalPath,
    ) -> Result<(), RemoteStoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        if let Some(err) = self.take_injected_download_failure() {
            return Err(err);
        }

        let data = {
            let inner = self.inner.lock().unwrap();
            inner
                .entries
                .get(remote.as_str())
                .ok_or_else(|| RemoteStoreError::NotFound(remote.as_str().to_string()))?
                .data
                .clone()
        };

        debug!(remote = %remote, local = %local, size = data.len(), "memory remote: download");

        if let Some(parent) = local.as_path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local.as_path(), &data).await?;

        Ok(())
    }

    async fn delete(&self, remote: &RemotePath) -> Result<(), RemoteStoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.entries.remove(remote.as_str()).is_none() {
            return Err(RemoteStoreError::NotFound(remote.as_str().to_string()));
        }
        inner
            .tombstones
            .insert(remote.as_str().to_string(), Utc::now());

        debug!(remote = %remote, "memory remote: delete");
        Ok(())
    }

    async fn changes_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteChange>, RemoteStoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let inner = self.inner.lock().unwrap();
        let mut changes: Vec<RemoteChange> = inner
            .entries
            .iter()
            .filter(|(_, e)| since.map(|s| e.modified > s).unwrap_or(true))
            .map(|(p, e)| RemoteChange {
                path: RemotePath::new(p.clone()).expect("stored paths are valid"),
                size: e.data.len() as u64,
                modified: e.modified,
                checksum: e.checksum.clone(),
                is_directory: e.is_directory,
                is_deleted: false,
            })
            .collect();

        // Deletions only make sense for incremental queries; the initial
        // full listing has nothing to delete against.
        if let Some(s) = since {
            changes.extend(
                inner
                    .tombstones
                    .iter()
                    .filter(|(_, deleted_at)| **deleted_at > s)
                    .map(|(p, deleted_at)| RemoteChange {
                        path: RemotePath::new(p.clone()).expect("stored paths are valid"),
                        size: 0,
                        modified: *deleted_at,
                        checksum: None,
                        is_directory: false,
                        is_deleted: true,
                    }),
            );
        }

        changes.sort_by(|a, b| a.modified.cmp(&b.modified));
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn remote(path: &str) -> RemotePath {
        RemotePath::new(path.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryRemoteStore::new();

        let src = LocalPath::new(dir.path().join("src.txt")).unwrap();
        tokio::fs::write(src.as_path(), b"payload").await.unwrap();

        let entry = store.upload(&src, &remote("/backup/src.txt")).await.unwrap();
        assert_eq!(entry.size, 7);
        assert!(entry.checksum.is_some());

        let dst = LocalPath::new(dir.path().join("dst.txt")).unwrap();
        store
            .download(&remote("/backup/src.txt"), &dst)
            .await
            .unwrap();

        let landed = tokio::fs::read(dst.as_path()).await.unwrap();
        assert_eq!(landed, b"payload");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryRemoteStore::new();
        let dst = LocalPath::new(dir.path().join("dst.txt")).unwrap();

        let result = store.download(&remote("/missing.txt"), &dst).await;
        assert!(matches!(result, Err(RemoteStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_and_tombstone() {
        let store = InMemoryRemoteStore::new();
        let start = Utc::now() - Duration::seconds(1);

        store.put_file(&remote("/a.txt"), b"data", Utc::now());
        store.delete(&remote("/a.txt")).await.unwrap();
        assert!(!store.has_file(&remote("/a.txt")));

        let changes = store.changes_since(Some(start)).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_deleted);
        assert_eq!(changes[0].path.as_str(), "/a.txt");
    }

    #[tokio::test]
    async fn test_changes_since_filters_by_time() {
        let store = InMemoryRemoteStore::new();
        let old = Utc::now() - Duration::hours(2);
        let cutoff = Utc::now() - Duration::hours(1);

        store.put_file(&remote("/old.txt"), b"old", old);
        store.put_file(&remote("/new.txt"), b"new", Utc::now());

        let changes = store.changes_since(Some(cutoff)).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.as_str(), "/new.txt");

        // Full listing returns everything
        let all = store.changes_since(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_list_returns_direct_children_only() {
        let store = InMemoryRemoteStore::new();
        let now = Utc::now();

        store.put_file(&remote("/docs/a.txt"), b"a", now);
        store.put_file(&remote("/docs/sub/b.txt"), b"b", now);
        store.put_file(&remote("/other.txt"), b"c", now);

        let children = store.list(&remote("/docs")).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path.as_str(), "/docs/a.txt");
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let store = InMemoryRemoteStore::new();
        store.put_file(&remote("/a.txt"), b"data", Utc::now());

        store.inject_failure(RemoteStoreError::Timeout("first".into()));

        let result = store.changes_since(None).await;
        assert!(matches!(result, Err(RemoteStoreError::Timeout(_))));

        // Queue drained: the next call succeeds
        assert!(store.changes_since(None).await.is_ok());
    }
}
