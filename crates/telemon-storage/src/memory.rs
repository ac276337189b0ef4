use crate::{Result, Storage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use telemon_common::types::Metric;

/// In-process store: one map, one mutex, held for the whole of every
/// operation.
#[derive(Default)]
pub struct MemStorage {
    records: Mutex<HashMap<String, Metric>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // No critical section can leave the map half-written, so a poisoned
    // lock still guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Metric>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn keyed(name: &str, metric: Metric) -> Metric {
    Metric {
        name: name.to_owned(),
        value: metric.value,
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn save(&self, name: &str, metric: Metric) -> Result<()> {
        self.lock().insert(name.to_owned(), keyed(name, metric));
        Ok(())
    }

    async fn update(&self, name: &str, metric: Metric) -> Result<()> {
        let mut records = self.lock();
        match records.get_mut(name) {
            Some(slot) => {
                *slot = keyed(name, metric);
                Ok(())
            }
            None => Err(StorageError::not_found(name)),
        }
    }

    async fn get(&self, name: &str) -> Result<Metric> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::not_found(name))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.lock().contains_key(name))
    }

    async fn all(&self) -> Result<Vec<Metric>> {
        Ok(self.lock().values().cloned().collect())
    }

    async fn all_with_keys(&self) -> Result<HashMap<String, Metric>> {
        Ok(self.lock().clone())
    }

    async fn fill(&self, records: HashMap<String, Metric>) -> Result<()> {
        let records = records
            .into_iter()
            .map(|(name, metric)| {
                let metric = keyed(&name, metric);
                (name, metric)
            })
            .collect();
        *self.lock() = records;
        Ok(())
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Metric>> {
        let records = self.lock();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn bulk_insert_or_update(&self, metrics: Vec<Metric>) -> Result<()> {
        let mut records = self.lock();
        for metric in metrics {
            records.insert(metric.name.clone(), metric);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}
