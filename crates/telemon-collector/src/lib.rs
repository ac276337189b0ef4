//! Metric collection for the telemon agent.
//!
//! Each [`Collector`] gathers one category of gauges and returns them as
//! [`Metric`]s ready to be written into the agent's table. The sampler runs
//! every registered collector on each poll tick.

pub mod cpu;
pub mod memory;
pub mod runtime;

use anyhow::Result;
use telemon_common::types::Metric;

pub use cpu::CpuCollector;
pub use memory::MemoryCollector;
pub use runtime::RuntimeCollector;

/// A metric source polled by the agent.
///
/// The trait requires `Send + Sync` so collectors can be moved into the
/// sampler task.
pub trait Collector: Send + Sync {
    /// Collector name (e.g. `"runtime"`, `"cpu"`), used for logging.
    fn name(&self) -> &str;

    /// Samples the current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}
