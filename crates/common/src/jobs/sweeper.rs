//! Periodic reconciliation of everything still in flight

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::errors::Result;
use crate::metrics::record_reconcile;

/// Counters from one sweep pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub visited: usize,
    pub errors: usize,
}

/// Something holding jobs that need periodic reconciliation
#[async_trait]
pub trait SweepTarget: Send + Sync {
    async fn sweep(&self) -> Result<SweepReport>;
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
}

/// Background loop calling [`SweepTarget::sweep`] on a fixed period
pub struct Sweeper {
    target: Arc<dyn SweepTarget>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(target: Arc<dyn SweepTarget>, config: SweeperConfig) -> Self {
        Self { target, config }
    }

    /// Run until the shutdown flag flips to true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.config.interval.as_secs(), "Sweeper started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        info!("Sweeper stopped");
    }

    async fn sweep_once(&self) {
        let started = Instant::now();
        match self.target.sweep().await {
            Ok(report) if report.visited > 0 => {
                info!(visited = report.visited, errors = report.errors, "Sweep finished");
            }
            Ok(_) => debug!("Sweep found nothing in flight"),
            Err(e) => error!(error = %e, "Sweep failed"),
        }
        record_reconcile(started.elapsed().as_secs_f64(), "sweep");
    }
}
