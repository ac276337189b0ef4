//! Metric storage for the telemon server.
//!
//! [`Storage`] is the single storage interface. Two backends implement it:
//! [`memory::MemStorage`], a map behind one mutex, and
//! [`store::DbStorage`], a `metrics` table reached through SeaORM
//! (SQLite or PostgreSQL). [`snapshot::SnapshotFile`] persists a full copy
//! of any backend as one JSON document.
//!
//! Every operation is `async`; dropping the returned future is the
//! cancellation signal. Neither backend exposes partial writes when a
//! future is dropped: the in-memory critical sections never await, and the
//! database backend rolls back uncommitted transactions on drop.

pub mod entities;
pub mod error;
pub mod memory;
pub mod snapshot;
pub mod store;


use async_trait::async_trait;
use std::collections::HashMap;
use telemon_common::types::Metric;

pub use error::{Result, StorageError};
pub use memory::MemStorage;
pub use snapshot::SnapshotFile;
pub use store::DbStorage;

/// Persistence backend for metrics, keyed by metric name.
///
/// A write under an existing name replaces the whole record, kind
/// included; merge rules live above this layer. Implementations must be
/// safe to share across threads because the HTTP handlers, the gRPC
/// service, and the snapshot task all hold the same instance.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts or replaces the metric stored under `name`.
    async fn save(&self, name: &str, metric: Metric) -> Result<()>;

    /// Replaces the metric stored under `name`; [`StorageError::NotFound`]
    /// if there is none.
    async fn update(&self, name: &str, metric: Metric) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Metric>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Every stored metric, in no particular order.
    async fn all(&self) -> Result<Vec<Metric>>;

    async fn all_with_keys(&self) -> Result<HashMap<String, Metric>>;

    /// Atomically replaces the entire store with `records`.
    async fn fill(&self, records: HashMap<String, Metric>) -> Result<()>;

    /// The subset of `ids` that is present; missing ids are skipped.
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Metric>>;

    /// Upserts every metric as one atomic step. Later entries win over
    /// earlier entries with the same name.
    async fn bulk_insert_or_update(&self, metrics: Vec<Metric>) -> Result<()>;

    /// Health probe.
    async fn ping(&self) -> Result<()>;

    /// Removes every record.
    async fn reset(&self) -> Result<()>;
}
