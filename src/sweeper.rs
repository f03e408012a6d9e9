use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{steps, AutomationLog, OrderCommand, OrderStatus};
use crate::metrics::Metrics;
use crate::store::{apply_command, with_lock, LockOutcome, OrderFilter, OrderStore, StoreError};
use crate::utils::circuit_breaker::to_chrono;

// ============================================================================
// Stuck-Order Sweeper
// ============================================================================
//
// Orders left in `payment_received` / `fulfillment_started` past the deadline
// (crashed worker, supplier timeout, lost webhook) go back to `pending` so the
// next batch run retries them. At most one sweep runs at a time across every
// instance; a sweep that cannot take the lock exits immediately.
//
// ============================================================================

pub const SWEEP_LOCK: &str = "stuck_order_sweep";

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    pub stale_after: Duration,
    pub lock_ttl: Duration,
    pub batch_limit: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(300),
            batch_limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepReport {
    /// Another sweep holds the lock.
    Skipped,
    Completed { reset: Vec<String> },
}

pub struct StuckOrderSweeper {
    store: Arc<dyn OrderStore>,
    config: SweeperConfig,
    metrics: Option<Arc<Metrics>>,
}

impl StuckOrderSweeper {
    pub fn new(store: Arc<dyn OrderStore>, config: SweeperConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let outcome = with_lock(self.store.clone(), SWEEP_LOCK, self.config.lock_ttl, || self.reset_stuck()).await?;

        let report = match outcome {
            LockOutcome::Skipped => {
                tracing::info!("Stuck-order sweep skipped: lock held by another run");
                SweepReport::Skipped
            }
            LockOutcome::Acquired(result) => SweepReport::Completed { reset: result? },
        };

        if let Some(metrics) = &self.metrics {
            match &report {
                SweepReport::Skipped => metrics.record_sweep("skipped", 0),
                SweepReport::Completed { reset } => metrics.record_sweep("completed", reset.len()),
            }
        }
        Ok(report)
    }

    async fn reset_stuck(&self) -> Result<Vec<String>, StoreError> {
        let cutoff = Utc::now() - to_chrono(self.config.stale_after);
        let filter = OrderFilter {
            statuses: OrderStatus::IN_FLIGHT.to_vec(),
            updated_before: Some(cutoff),
            limit: Some(self.config.batch_limit),
            ..Default::default()
        };
        let stuck = self.store.find_orders(&filter).await?;
        let minutes = self.config.stale_after.as_secs() / 60;
        let mut reset = Vec::with_capacity(stuck.len());

        for order in stuck {
            let reason = format!("Auto-retry: stuck in {} for over {} minutes", order.status, minutes);
            let command = OrderCommand::SweepReset {
                reason: reason.clone(),
                stale_before: cutoff,
            };

            match apply_command(self.store.as_ref(), &order.id, command).await {
                Ok(_) => {}
                Err(StoreError::Rejected(e)) => {
                    // Progressed or was claimed again since it was read.
                    tracing::debug!(order_id = %order.id, reason = %e, "Stuck order moved on before reset");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let log = AutomationLog::success(&order.id, steps::STUCK_ORDER_RESET)
                .with_metadata("previous_status", order.status.as_str())
                .with_metadata("reason", reason);
            if let Err(e) = self.store.append_log(&log).await {
                tracing::error!(order_id = %order.id, error = %e, "Failed to append automation log");
            }
            tracing::warn!(order_id = %order.id, previous_status = %order.status, "Stuck order reset to pending");
            reset.push(order.id);
        }

        tracing::info!(count = reset.len(), "Stuck-order sweep finished");
        Ok(reset)
    }
}
