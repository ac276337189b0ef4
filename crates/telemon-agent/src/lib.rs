//! The telemon agent: a sampler that folds runtime and host gauges into a
//! shared [`table::MetricTable`], and a reporter that ships the table to a
//! telemon server on its own period.

pub mod config;
pub mod envelope;
pub mod reporter;
pub mod sampler;
pub mod table;
pub mod transport;

use reporter::Reporter;
use sampler::Sampler;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Runs the sampler and reporter loops until `token` is cancelled, then
/// performs one last report so the final samples are not lost.
pub async fn run(
    sampler: Sampler,
    reporter: Reporter,
    poll_interval: Duration,
    report_interval: Duration,
    token: CancellationToken,
) {
    let reporter = Arc::new(reporter);
    let sampling = tokio::spawn(sample_loop(sampler, poll_interval, token.clone()));
    let reporting = tokio::spawn(report_loop(reporter.clone(), report_interval, token.clone()));

    for (name, handle) in [("sampler", sampling), ("reporter", reporting)] {
        if let Err(e) = handle.await {
            tracing::error!(task = name, error = %e, "Agent task failed");
        }
    }

    tracing::info!("Sending final report");
    reporter.report().await;
}

async fn sample_loop(mut sampler: Sampler, period: Duration, token: CancellationToken) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => sampler.sample(),
            _ = token.cancelled() => break,
        }
    }
}

async fn report_loop(reporter: Arc<Reporter>, period: Duration, token: CancellationToken) {
    // First report after one full period, not at startup.
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                reporter.report().await;
            }
            _ = token.cancelled() => break,
        }
    }
}
