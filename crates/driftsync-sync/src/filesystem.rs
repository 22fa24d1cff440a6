//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file
//! operations and `sha2` for content checksums.

use std::io::ErrorKind;

use chrono::DateTime;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use driftsync_core::{
    domain::newtypes::{Checksum, LocalPath},
    ports::local_filesystem::{FileSystemState, ILocalFileSystem},
};

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// This is a zero-sized struct because all operations derive their context
/// from the [`LocalPath`] arguments. Configuration (e.g. folder roots)
/// lives at a higher layer.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path))]
    async fn get_state(&self, path: &LocalPath) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path.as_path()).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let is_file = metadata.is_file();
        let size = metadata.len();

        // Convert system modified time to DateTime<Utc>.
        let modified = metadata.modified().ok().and_then(|st| {
            st.duration_since(std::time::UNIX_EPOCH)
                .ok()
                .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
        });

        debug!(exists = true, is_file, size, "state retrieved");

        Ok(FileSystemState {
            exists: true,
            is_file,
            size,
            modified,
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn compute_checksum(&self, path: &LocalPath) -> anyhow::Result<Checksum> {
        debug!("computing sha-256 checksum");
        let data = tokio::fs::read(path.as_path()).await?;

        // Hash on a blocking thread; large files would otherwise stall the
        // runtime worker.
        let digest = tokio::task::spawn_blocking(move || {
            let mut hasher = Sha256::new();
            hasher.update(&data);
            let out: [u8; 32] = hasher.finalize().into();
            out
        })
        .await?;

        let checksum = Checksum::from_digest(&digest);
        debug!(checksum = %checksum, "checksum computed");
        Ok(checksum)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_directory(&self, path: &LocalPath) -> anyhow::Result<()> {
        debug!("creating directory");
        tokio::fs::create_dir_all(path.as_path()).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &LocalPath) -> anyhow::Result<()> {
        let p = path.as_path();
        let metadata = tokio::fs::metadata(p).await?;

        if metadata.is_dir() {
            debug!("removing directory recursively");
            tokio::fs::remove_dir_all(p).await?;
        } else {
            debug!("removing file");
            tokio::fs::remove_file(p).await?;
        }

        Ok(())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
