use crate::table::{MetricTable, POLL_COUNT, RANDOM_VALUE};
use rand::Rng;
use std::sync::Arc;
use telemon_collector::Collector;

/// Runs every collector and folds the result into the table.
pub struct Sampler {
    collectors: Vec<Box<dyn Collector>>,
    table: Arc<MetricTable>,
}

impl Sampler {
    pub fn new(collectors: Vec<Box<dyn Collector>>, table: Arc<MetricTable>) -> Self {
        Self { collectors, table }
    }

    /// One poll: all collector gauges, a fresh `RandomValue` in `[1, 50]`,
    /// and `PollCount += 1`. A failing collector is logged and skipped.
    pub fn sample(&mut self) {
        let mut metrics = Vec::new();
        for collector in &mut self.collectors {
            match collector.collect() {
                Ok(points) => metrics.extend(points),
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
                }
            }
        }
        tracing::debug!(count = metrics.len(), "Collected metrics");

        let random: u32 = rand::thread_rng().gen_range(1..=50);
        self.table.record(metrics);
        self.table.set_gauge(RANDOM_VALUE, f64::from(random));
        self.table.inc_counter(POLL_COUNT, 1);
    }
}
