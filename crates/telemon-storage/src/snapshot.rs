use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use telemon_common::types::Metric;
use tokio::sync::Mutex;

/// On-disk shape: `{ "records": { "<name>": <metric>, ... } }`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub records: HashMap<String, Metric>,
}

/// A JSON dump of the whole store at a fixed path.
///
/// Writes go to a sibling `*.tmp` file that is then renamed over the
/// target, so readers only ever see a complete document. Concurrent
/// writers are serialized.
pub struct SnapshotFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Publishes `records` as the new snapshot.
    pub async fn write(&self, records: HashMap<String, Metric>) -> Result<()> {
        let body = serde_json::to_vec(&Snapshot { records })?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), bytes = body.len(), "Snapshot written");
        Ok(())
    }

    /// Loads the last published snapshot. `None` if the file does not exist.
    ///
    /// Records are re-keyed by map key so the stored name always matches
    /// the key it was filed under.
    pub async fn read(&self) -> Result<Option<HashMap<String, Metric>>> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&body)?;
        let records = snapshot
            .records
            .into_iter()
            .map(|(key, metric)| {
                let metric = Metric {
                    name: key.clone(),
                    value: metric.value,
                };
                (key, metric)
            })
            .collect();
        Ok(Some(records))
    }
}
