use crate::Collector;
use anyhow::{anyhow, Result};
use std::alloc::System as SystemAlloc;
use stats_alloc::{Stats, StatsAlloc};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use telemon_common::types::Metric;

/// Runtime gauges with no Rust counterpart. They are always reported so
/// the server sees a stable metric set.
const ZERO_GAUGES: &[&str] = &[
    "BuckHashSys",
    "GCCPUFraction",
    "GCSys",
    "HeapReleased",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
];

/// Process runtime statistics: allocator counters from a [`StatsAlloc`]
/// plus the process memory footprint from `sysinfo`.
///
/// The allocator is only meaningful if it is the binary's
/// `#[global_allocator]`; otherwise every allocator-derived gauge is 0.
pub struct RuntimeCollector {
    alloc: &'static StatsAlloc<SystemAlloc>,
    system: System,
    pid: Pid,
}

impl RuntimeCollector {
    pub fn new(alloc: &'static StatsAlloc<SystemAlloc>) -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("current pid: {e}"))?;
        Ok(Self {
            alloc,
            system: System::new(),
            pid,
        })
    }

    /// Resident set and virtual size of this process, in bytes.
    fn process_memory(&mut self) -> Result<(u64, u64)> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not found", self.pid))?;
        Ok((process.memory(), process.virtual_memory()))
    }
}

/// Bytes currently live on the heap.
fn live_bytes(stats: &Stats) -> u64 {
    let live = stats.bytes_allocated as i128 - stats.bytes_deallocated as i128
        + stats.bytes_reallocated as i128;
    live.max(0) as u64
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let stats = self.alloc.stats();
        let (resident, virtual_size) = self.process_memory()?;

        let heap_inuse = live_bytes(&stats);
        let objects = stats.allocations.saturating_sub(stats.deallocations);

        let mut metrics = vec![
            Metric::gauge("Alloc", heap_inuse as f64),
            Metric::gauge("HeapAlloc", heap_inuse as f64),
            Metric::gauge("HeapInuse", heap_inuse as f64),
            Metric::gauge("TotalAlloc", stats.bytes_allocated as f64),
            Metric::gauge("Mallocs", stats.allocations as f64),
            Metric::gauge("Frees", stats.deallocations as f64),
            Metric::gauge("HeapObjects", objects as f64),
            Metric::gauge("Sys", virtual_size as f64),
            Metric::gauge("HeapSys", resident as f64),
            Metric::gauge("HeapIdle", resident.saturating_sub(heap_inuse) as f64),
            Metric::gauge("OtherSys", virtual_size.saturating_sub(resident) as f64),
        ];
        metrics.extend(ZERO_GAUGES.iter().map(|name| Metric::gauge(*name, 0.0)));
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stats_alloc::INSTRUMENTED_SYSTEM;
    use std::collections::HashSet;

    const CANONICAL: &[&str] = &[
        "Alloc", "BuckHashSys", "Frees", "GCCPUFraction", "GCSys", "HeapAlloc", "HeapIdle",
        "HeapInuse", "HeapObjects", "HeapReleased", "HeapSys", "LastGC", "Lookups",
        "MCacheInuse", "MCacheSys", "MSpanInuse", "MSpanSys", "Mallocs", "NextGC",
        "NumForcedGC", "NumGC", "OtherSys", "PauseTotalNs", "StackInuse", "StackSys", "Sys",
        "TotalAlloc",
    ];

    #[test]
    fn emits_every_runtime_gauge_once() {
        let mut collector = RuntimeCollector::new(&INSTRUMENTED_SYSTEM).unwrap();
        let metrics = collector.collect().unwrap();

        let names: HashSet<_> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names.len(), metrics.len());
        assert_eq!(names, CANONICAL.iter().copied().collect());
        assert!(metrics.iter().all(|m| m.gauge_value().is_some()));
    }

    #[test]
    fn process_footprint_is_nonzero() {
        let mut collector = RuntimeCollector::new(&INSTRUMENTED_SYSTEM).unwrap();
        let metrics = collector.collect().unwrap();
        let sys = metrics.iter().find(|m| m.name == "HeapSys").unwrap();
        assert!(sys.gauge_value().unwrap() > 0.0);
    }

    #[test]
    fn live_bytes_accounts_for_reallocations() {
        let stats = Stats {
            allocations: 3,
            deallocations: 1,
            reallocations: 1,
            bytes_allocated: 300,
            bytes_deallocated: 100,
            bytes_reallocated: -50,
        };
        assert_eq!(live_bytes(&stats), 150);

        let drained = Stats {
            bytes_deallocated: 400,
            ..stats
        };
        assert_eq!(live_bytes(&drained), 0);
    }
}
