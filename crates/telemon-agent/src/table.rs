use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use telemon_common::types::{Metric, MetricValue};

/// Counter incremented once per sampler pass.
pub const POLL_COUNT: &str = "PollCount";
/// Gauge set to a fresh random integer on every sampler pass.
pub const RANDOM_VALUE: &str = "RandomValue";

/// The agent's current view of every metric, shared by the sampler and
/// the reporter.
///
/// Counters hold the delta accumulated since the last report; the
/// reporter subtracts what it shipped once a pass is over.
#[derive(Debug, Default)]
pub struct MetricTable {
    entries: Mutex<HashMap<String, MetricValue>>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MetricValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        if !value.is_finite() {
            tracing::debug!(metric = name, value, "dropping non-finite gauge");
            return;
        }
        self.lock().insert(name.to_owned(), MetricValue::Gauge(value));
    }

    /// Adds `delta` to the named counter, creating it at 0 first.
    pub fn inc_counter(&self, name: &str, delta: i64) {
        let mut entries = self.lock();
        let slot = entries
            .entry(name.to_owned())
            .or_insert(MetricValue::Counter(0));
        *slot = match *slot {
            MetricValue::Counter(v) => MetricValue::Counter(v.wrapping_add(delta)),
            MetricValue::Gauge(_) => MetricValue::Counter(delta),
        };
    }

    /// Applies a whole sample in one critical section: gauges overwrite,
    /// counters accumulate. Non-finite gauges keep the previous reading,
    /// since the collector refuses them.
    pub fn record(&self, metrics: Vec<Metric>) {
        let mut entries = self.lock();
        for metric in metrics {
            if let MetricValue::Gauge(v) = metric.value {
                if !v.is_finite() {
                    tracing::debug!(metric = %metric.name, value = v, "dropping non-finite gauge");
                    continue;
                }
            }
            let value = match (entries.get(&metric.name), metric.value) {
                (Some(MetricValue::Counter(old)), MetricValue::Counter(delta)) => {
                    MetricValue::Counter(old.wrapping_add(delta))
                }
                (_, value) => value,
            };
            entries.insert(metric.name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.lock().get(name).copied()
    }

    /// Copies out every entry, sorted by name.
    pub fn snapshot(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self
            .lock()
            .iter()
            .map(|(name, value)| Metric {
                name: name.clone(),
                value: *value,
            })
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Removes already-reported counter deltas. Increments that landed
    /// after the snapshot was taken stay in the table for the next report.
    pub fn settle(&self, reported: &[Metric]) {
        let mut entries = self.lock();
        for metric in reported {
            let MetricValue::Counter(sent) = metric.value else {
                continue;
            };
            if let Some(MetricValue::Counter(live)) = entries.get_mut(&metric.name) {
                *live = live.wrapping_sub(sent);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
