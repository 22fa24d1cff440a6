//! driftsync Daemon - Background synchronization service
//!
//! This binary hosts the sync engine:
//! - Loads the YAML configuration and opens the metadata store
//! - Wires the orchestrator to the configured remote adapter
//! - Logs engine events as the activity stream
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon owns the engine-side command boundary. Shell frontends (GUI,
//! CLI, tray) attach their transport of choice to the [`EngineClient`]
//! handle; the daemon itself only keeps the channel alive and mirrors the
//! event stream into the log. The whole process is controlled by a
//! `CancellationToken` triggered on receipt of SIGTERM or SIGINT.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use driftsync_core::config::Config;
use driftsync_core::ports::{IRemoteStore, IStateRepository};
use driftsync_ipc::{EngineClient, EngineEvent};
use driftsync_store::{DatabasePool, SqliteStateRepository};
use driftsync_sync::{InMemoryRemoteStore, LocalFileSystemAdapter, Orchestrator};

// ============================================================================
// DaemonService
// ============================================================================

/// Main daemon service that wires the engine together
struct DaemonService {
    /// Application configuration loaded from YAML
    config: Config,
    /// SQLite state repository for sync state persistence
    store: Arc<dyn IStateRepository>,
    /// Shell-side handle; kept alive so the command boundary stays open
    client: EngineClient,
    /// Engine-side half of the boundary, consumed by the orchestrator
    endpoint: Option<driftsync_ipc::EngineEndpoint>,
    /// Token for signalling graceful shutdown to all async tasks
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Creates a new DaemonService
    ///
    /// Loads configuration, validates it, and opens the database.
    async fn new(shutdown: CancellationToken) -> Result<Self> {
        let config_path = Config::default_path();
        let config = Config::load_or_default(&config_path);
        info!(config_path = %config_path.display(), "Loaded configuration");

        let problems = config.validate();
        if !problems.is_empty() {
            for problem in &problems {
                error!(%problem, "Invalid configuration");
            }
            anyhow::bail!("Configuration is invalid ({} problem(s))", problems.len());
        }

        let db_pool = DatabasePool::new(&config.database.path)
            .await
            .context("Failed to open database")?;
        let store: Arc<dyn IStateRepository> =
            Arc::new(SqliteStateRepository::new(db_pool.pool().clone()));

        let (client, endpoint) = driftsync_ipc::client::channel();

        Ok(Self {
            config,
            store,
            client,
            endpoint: Some(endpoint),
            shutdown,
        })
    }

    /// Builds the remote store adapter named in the configuration
    ///
    /// The engine core ships only the in-process `memory` adapter (a
    /// loopback remote, useful for local smoke runs). Production adapters
    /// are linked in by the surrounding shell, which constructs its own
    /// orchestrator with its own `IRemoteStore`.
    fn build_remote(&self) -> Result<Arc<dyn IRemoteStore>> {
        match self.config.remote.adapter.as_str() {
            "memory" => {
                warn!(
                    "Using the in-process memory remote adapter; \
                     data is not persisted beyond this process"
                );
                Ok(Arc::new(InMemoryRemoteStore::new()))
            }
            other => {
                anyhow::bail!(
                    "Unknown remote adapter '{other}'. This build ships only \
                     'memory'; link a real adapter in the hosting shell."
                );
            }
        }
    }

    /// Runs the daemon until shutdown
    async fn run(mut self) -> Result<()> {
        let remote = self.build_remote()?;
        let local_fs = Arc::new(LocalFileSystemAdapter::new());
        let endpoint = self
            .endpoint
            .take()
            .context("Daemon endpoint already consumed")?;

        let orchestrator = Orchestrator::new(
            self.config.clone(),
            self.store.clone(),
            remote,
            local_fs,
            endpoint,
            self.shutdown.clone(),
        )
        .context("Failed to construct orchestrator")?;

        // Mirror the engine's event stream into the log as the activity
        // record
        let mut events = self.client.subscribe();
        let event_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => log_event(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Event logger lagged behind the engine");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = event_shutdown.cancelled() => break,
                }
            }
        });

        info!("driftsync engine starting");
        orchestrator.run().await
    }
}

/// Writes one engine event to the activity log
fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::SyncStateChanged {
            folder_id,
            status,
            pending_uploads,
            pending_downloads,
        } => {
            info!(
                %folder_id,
                status,
                pending_uploads,
                pending_downloads,
                "Sync state changed"
            );
        }
        EngineEvent::FileTransferred {
            folder_id,
            path,
            direction,
            size,
        } => {
            info!(%folder_id, path, ?direction, size, "File transferred");
        }
        EngineEvent::ConflictDetected {
            folder_id,
            path,
            local_modified,
            remote_modified,
        } => {
            warn!(
                %folder_id,
                path,
                %local_modified,
                %remote_modified,
                "Conflict detected"
            );
        }
        EngineEvent::OperationFailed {
            folder_id,
            path,
            kind,
        } => {
            warn!(%folder_id, ?path, kind, "Operation failed");
        }
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!("driftsync daemon starting (driftsyncd)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(shutdown_token.clone()).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("driftsync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "driftsync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_child_propagation() {
        let parent = CancellationToken::new();
        let child1 = parent.child_token();
        let child2 = parent.child_token();

        assert!(!child1.is_cancelled());
        assert!(!child2.is_cancelled());

        parent.cancel();

        assert!(child1.is_cancelled());
        assert!(child2.is_cancelled());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty());
        assert!(config.sync.poll_interval_secs > 0);
    }

    #[tokio::test]
    async fn test_unknown_remote_adapter_is_rejected() {
        let mut config = Config::default();
        config.remote.adapter = "carrier_pigeon".to_string();

        let (client, endpoint) = driftsync_ipc::client::channel();
        let pool = driftsync_store::DatabasePool::in_memory().await.unwrap();
        let store: Arc<dyn IStateRepository> = Arc::new(
            driftsync_store::SqliteStateRepository::new(pool.pool().clone()),
        );

        let service = DaemonService {
            config,
            store,
            client,
            endpoint: Some(endpoint),
            shutdown: CancellationToken::new(),
        };

        assert!(service.build_remote().is_err());
    }
}
