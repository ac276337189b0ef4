use crate::durability::Durability;
use crate::error::ServiceError;
use std::collections::HashSet;
use std::sync::Arc;
use telemon_common::types::{Metric, MetricDto, MetricKind, MetricQuery, MetricValue};
use telemon_storage::{Storage, StorageError};
use tokio::sync::Mutex;

/// Applies gauge and counter semantics on top of a [`Storage`].
///
/// Writes are serialized by one async lock so that a counter's
/// read-modify-write never interleaves with another write to the same
/// name. Reads go straight to storage.
pub struct MetricsService {
    storage: Arc<dyn Storage>,
    durability: Option<Arc<Durability>>,
    write_lock: Mutex<()>,
}

impl MetricsService {
    pub fn new(storage: Arc<dyn Storage>, durability: Option<Arc<Durability>>) -> Self {
        Self {
            storage,
            durability,
            write_lock: Mutex::new(()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Validates and ingests one metric, returning what is now stored.
    pub async fn add(&self, dto: &MetricDto) -> Result<Metric, ServiceError> {
        let metric = dto.validate()?;

        let _guard = self.write_lock.lock().await;
        match metric.kind() {
            MetricKind::Gauge => self.put_gauge(metric.clone()).await?,
            MetricKind::Counter => self.add_counter(metric.clone()).await?,
        }
        let stored = self.storage.get(&metric.name).await?;
        self.sync_snapshot().await?;
        Ok(stored)
    }

    /// Ingests a batch. Gauges land in one bulk write, last one wins;
    /// counters are applied one by one in input order so duplicates
    /// accumulate. The whole batch is rejected if any entry is invalid.
    pub async fn bulk_add(&self, dtos: &[MetricDto]) -> Result<Vec<Metric>, ServiceError> {
        let metrics = dtos
            .iter()
            .map(MetricDto::validate)
            .collect::<Result<Vec<_>, _>>()?;
        if metrics.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = {
            let mut seen = HashSet::new();
            metrics
                .iter()
                .filter(|m| seen.insert(m.name.as_str()))
                .map(|m| m.name.clone())
                .collect()
        };
        let (gauges, counters): (Vec<Metric>, Vec<Metric>) = metrics
            .into_iter()
            .partition(|m| m.kind() == MetricKind::Gauge);

        let _guard = self.write_lock.lock().await;
        if !gauges.is_empty() {
            self.storage.bulk_insert_or_update(gauges).await?;
        }
        for counter in counters {
            self.add_counter(counter).await?;
        }
        let stored = self.storage.get_by_ids(&ids).await?;
        self.sync_snapshot().await?;

        tracing::debug!(count = stored.len(), "Bulk update applied");
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Metric, ServiceError> {
        Ok(self.storage.get(id).await?)
    }

    /// Looks a metric up by id and kind. A metric stored under the id with
    /// the other kind counts as absent.
    pub async fn find(&self, query: &MetricQuery) -> Result<Metric, ServiceError> {
        let kind: MetricKind = query.kind.parse()?;
        let metric = self.get(&query.id).await?;
        if metric.kind() != kind {
            return Err(ServiceError::NotFound(format!(
                "metric {:?} is not a {kind}",
                query.id
            )));
        }
        Ok(metric)
    }

    /// Every stored metric, sorted by name.
    pub async fn get_all(&self) -> Result<Vec<Metric>, ServiceError> {
        let mut metrics = self.storage.all().await?;
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metrics)
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.storage.ping().await?)
    }

    async fn put_gauge(&self, metric: Metric) -> Result<(), StorageError> {
        if self.storage.has(&metric.name).await? {
            self.storage.update(&metric.name, metric.clone()).await
        } else {
            self.storage.save(&metric.name, metric.clone()).await
        }
    }

    async fn add_counter(&self, metric: Metric) -> Result<(), StorageError> {
        if !self.storage.has(&metric.name).await? {
            return self.storage.save(&metric.name, metric.clone()).await;
        }
        let current = self.storage.get(&metric.name).await?;
        match (current.value, metric.value) {
            (MetricValue::Counter(old), MetricValue::Counter(delta)) => {
                let sum = Metric::counter(metric.name.clone(), old.wrapping_add(delta));
                self.storage.update(&metric.name, sum).await
            }
            // Kind switch: the new record replaces the old one outright.
            _ => self.storage.save(&metric.name, metric.clone()).await,
        }
    }

    async fn sync_snapshot(&self) -> Result<(), ServiceError> {
        match &self.durability {
            Some(durability) if durability.is_synchronous() => durability
                .snapshot()
                .await
                .map_err(|e| ServiceError::Internal(format!("snapshot failed: {e}"))),
            _ => Ok(()),
        }
    }
}
