//! Periodic pattern analysis.
//!
//! Re-clusters the whole action history on a fixed interval so patterns
//! missed by incremental clustering still surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::orchestrator::Orchestrator;

/// Background loop that calls [`Orchestrator::analyze_patterns`] on a timer.
pub struct PatternAnalysisScheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl PatternAnalysisScheduler {
    /// Uses the orchestrator's configured analysis interval.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let interval = Duration::from_secs(orchestrator.config().learner.analysis_interval_secs);
        Self::with_interval(orchestrator, interval)
    }

    pub fn with_interval(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run until [`PatternAnalysisScheduler::shutdown`] is called.
    ///
    /// The first pass happens one interval after start.
    pub async fn run(&self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Pattern analysis started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let updates = self.orchestrator.analyze_patterns();
                    tracing::debug!(updates = updates.len(), "Periodic pattern analysis");
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("Pattern analysis stopped");
                    return;
                }
            }
        }
    }

    /// Stop the loop. A call made before `run` starts still stops it.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
