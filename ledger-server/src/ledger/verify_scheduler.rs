//! Ledger verification scheduler
//!
//! Verifies the full chain once at start-up, then every
//! `verify_interval`. Stops on the shutdown token.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::report::VerificationReport;
use super::service::LedgerService;
use super::types::VerifyScope;

pub struct VerifyScheduler {
    ledger: Arc<LedgerService>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl VerifyScheduler {
    pub fn new(ledger: Arc<LedgerService>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            ledger,
            interval,
            shutdown,
        }
    }

    /// 主循环：启动验证 → 周期触发
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Verify scheduler started");

        self.run_once().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Verify scheduler received shutdown signal");
                    break;
                }
            }
            self.run_once().await;
        }

        tracing::info!("Verify scheduler stopped");
    }

    /// One full-chain pass; failures are logged, never propagated
    pub async fn run_once(&self) -> Option<VerificationReport> {
        let ledger = self.ledger.clone();
        let outcome =
            tokio::task::spawn_blocking(move || ledger.verify_chain(VerifyScope::Full)).await;

        match outcome {
            Ok(Ok(report)) => {
                if report.overall_valid {
                    tracing::info!(
                        blocks = report.summary.total_blocks,
                        "Scheduled ledger verification: chain intact"
                    );
                } else {
                    tracing::warn!(
                        blocks = report.summary.total_blocks,
                        invalid = report.summary.invalid_blocks,
                        findings = report.summary.total_findings,
                        "Scheduled ledger verification: issues found"
                    );
                }
                Some(report)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Scheduled ledger verification failed");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Verification task panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory_store::MemoryBlockStore;
    use crate::records::RecordStore;

    fn ledger() -> Arc<LedgerService> {
        Arc::new(LedgerService::new(
            Arc::new(MemoryBlockStore::new()),
            Arc::new(RecordStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_run_once_on_empty_chain() {
        let scheduler = VerifyScheduler::new(ledger(), Duration::from_secs(60), CancellationToken::new());
        let report = scheduler.run_once().await.unwrap();
        assert!(report.overall_valid);
        assert_eq!(report.summary.total_blocks, 0);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let scheduler = VerifyScheduler::new(ledger(), Duration::from_secs(3600), shutdown.clone());
        let handle = tokio::spawn(scheduler.run());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
