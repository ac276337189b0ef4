use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemon_storage::{SnapshotFile, Storage, StorageError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// When the store is written to the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// A background task dumps the store on a fixed period.
    Periodic(Duration),
    /// Every successful write dumps the store before it returns.
    Synchronous,
}

impl DurabilityMode {
    /// `0` selects synchronous mode.
    pub fn from_interval_secs(secs: u64) -> Self {
        if secs == 0 {
            DurabilityMode::Synchronous
        } else {
            DurabilityMode::Periodic(Duration::from_secs(secs))
        }
    }
}

/// Keeps a JSON dump of the store on disk and restores it on startup.
pub struct Durability {
    storage: Arc<dyn Storage>,
    file: Arc<SnapshotFile>,
    mode: DurabilityMode,
}

impl Durability {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<PathBuf>, mode: DurabilityMode) -> Self {
        Self {
            storage,
            file: Arc::new(SnapshotFile::new(path)),
            mode,
        }
    }

    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    pub fn is_synchronous(&self) -> bool {
        self.mode == DurabilityMode::Synchronous
    }

    /// Loads the snapshot into the store. Best effort: a missing or
    /// unreadable file leaves the store as it is.
    pub async fn restore(&self) -> bool {
        let path = self.file.path().display().to_string();
        match self.file.read().await {
            Ok(Some(records)) => {
                let count = records.len();
                match self.storage.fill(records).await {
                    Ok(()) => {
                        tracing::info!(path = %path, count, "Restored metrics from snapshot");
                        true
                    }
                    Err(e) => {
                        tracing::error!(path = %path, error = %e, "Failed to load snapshot into storage");
                        false
                    }
                }
            }
            Ok(None) => {
                tracing::info!(path = %path, "No snapshot to restore");
                false
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Snapshot unreadable, starting empty");
                false
            }
        }
    }

    /// Writes the full store to the snapshot file.
    ///
    /// The write runs on its own task, so it completes (or fails) as a
    /// whole even if the caller is dropped midway.
    pub async fn snapshot(&self) -> Result<(), StorageError> {
        let storage = self.storage.clone();
        let file = self.file.clone();
        tokio::spawn(async move {
            let records = storage.all_with_keys().await?;
            file.write(records).await
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }

    /// Periodic dump loop. Failures are logged and retried on the next
    /// tick. Returns once `token` is cancelled; the final dump is left to
    /// [`Durability::shutdown`].
    pub async fn run_periodic(self: Arc<Self>, token: CancellationToken) {
        let DurabilityMode::Periodic(period) = self.mode else {
            return;
        };
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = period.as_secs(), "Periodic snapshots enabled");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.snapshot().await {
                        Ok(()) => tracing::debug!("Periodic snapshot written"),
                        Err(e) => tracing::error!(error = %e, "Periodic snapshot failed"),
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    }

    /// Final dump on shutdown. Synchronous mode is already current.
    pub async fn shutdown(&self) {
        if self.is_synchronous() {
            return;
        }
        match self.snapshot().await {
            Ok(()) => tracing::info!(path = %self.file.path().display(), "Final snapshot written"),
            Err(e) => tracing::error!(error = %e, "Final snapshot failed"),
        }
    }
}
