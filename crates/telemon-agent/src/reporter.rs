use crate::table::MetricTable;
use crate::transport::Transport;
use std::sync::Arc;
use telemon_common::types::Metric;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of one report pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Ships table snapshots to the server.
pub struct Reporter {
    table: Arc<MetricTable>,
    transport: Arc<dyn Transport>,
    limiter: Arc<Semaphore>,
    batch: bool,
}

impl Reporter {
    /// `rate_limit` caps the number of requests in flight at once.
    pub fn new(
        table: Arc<MetricTable>,
        transport: Arc<dyn Transport>,
        rate_limit: usize,
        batch: bool,
    ) -> Self {
        Self {
            table,
            transport,
            limiter: Arc::new(Semaphore::new(rate_limit.max(1))),
            batch,
        }
    }

    /// Snapshots the table, sends it without holding the table lock, then
    /// settles the counters that were shipped. Counters are settled even
    /// when some sends fail.
    pub async fn report(&self) -> ReportSummary {
        let snapshot = self.table.snapshot();
        if snapshot.is_empty() {
            return ReportSummary::default();
        }

        let summary = if self.batch {
            self.send_batch(&snapshot).await
        } else {
            self.send_each(&snapshot).await
        };
        self.table.settle(&snapshot);

        if summary.failed > 0 {
            tracing::warn!(sent = summary.sent, failed = summary.failed, "Report incomplete");
        } else {
            tracing::debug!(sent = summary.sent, "Metrics reported");
        }
        summary
    }

    async fn send_batch(&self, snapshot: &[Metric]) -> ReportSummary {
        let failed_all = ReportSummary {
            sent: 0,
            failed: snapshot.len(),
        };
        let Ok(_permit) = self.limiter.acquire().await else {
            return failed_all;
        };
        match self.transport.send_batch(snapshot).await {
            Ok(()) => ReportSummary {
                sent: snapshot.len(),
                failed: 0,
            },
            Err(e) => {
                tracing::warn!(error = %e, count = snapshot.len(), "Bulk report failed");
                failed_all
            }
        }
    }

    async fn send_each(&self, snapshot: &[Metric]) -> ReportSummary {
        let mut tasks = JoinSet::new();
        for metric in snapshot.iter().cloned() {
            let transport = self.transport.clone();
            let limiter = self.limiter.clone();
            tasks.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return Err(anyhow::anyhow!("rate limiter closed"));
                };
                transport
                    .send_one(&metric)
                    .await
                    .map_err(|e| e.context(format!("sending {}", metric.name)))
            });
        }

        let mut summary = ReportSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => summary.sent += 1,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Metric report failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Report task aborted");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}
