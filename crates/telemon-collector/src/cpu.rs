use crate::Collector;
use anyhow::Result;
use sysinfo::System;
use telemon_common::types::Metric;

/// Per-CPU utilization in percent, one gauge per logical CPU named
/// `CPUutilization1` .. `CPUutilizationN`.
///
/// Usage is computed between two refreshes, so the first sample after
/// construction may read 0.
pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_cpu_all();
        Ok(self
            .system
            .cpus()
            .iter()
            .enumerate()
            .map(|(i, cpu)| Metric::gauge(format!("CPUutilization{}", i + 1), cpu.cpu_usage() as f64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_gauge_per_cpu_numbered_from_one() {
        let metrics = CpuCollector::new().collect().unwrap();
        assert!(!metrics.is_empty());
        assert_eq!(metrics[0].name, "CPUutilization1");
        for (i, metric) in metrics.iter().enumerate() {
            assert_eq!(metric.name, format!("CPUutilization{}", i + 1));
            let usage = metric.gauge_value().unwrap();
            assert!((0.0..=100.0).contains(&usage));
        }
    }
}
