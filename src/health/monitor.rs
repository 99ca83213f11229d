use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ConnectionError;
use crate::context::Context;
use crate::metrics::metrics;
use crate::pool::{ConnectionPool, Lease, PoolError};

use super::state::{CheckResult, HealthState};

/// Why a liveness ping failed
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("failed to acquire connection: {0}")]
    Acquire(#[from] PoolError),

    #[error("ping failed: {0}")]
    Backend(#[from] ConnectionError),
}

/// Borrow a connection, ping it and hand it back
pub async fn ping_once(pool: &Arc<dyn ConnectionPool>, ctx: &Context) -> Result<(), PingError> {
    let mut lease = Lease::acquire(pool, ctx).await?;
    lease.conn().ping(ctx).await?;
    lease.release();
    Ok(())
}

/// Periodic liveness check feeding a node's `HealthState`
pub struct HealthMonitor {
    node: String,
    pool: Arc<dyn ConnectionPool>,
    state: Arc<HealthState>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        node: impl Into<String>,
        pool: Arc<dyn ConnectionPool>,
        state: Arc<HealthState>,
        interval: Duration,
    ) -> Self {
        Self {
            node: node.into(),
            pool,
            state,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Run until `shutdown` fires; the first check happens one interval in
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = self.check() => {}
                        }
                    }
                }
            }
            debug!(node = %self.node, "Health monitor stopped");
        })
    }

    /// Run one check and fold it into the state machine
    pub async fn check(&self) -> CheckResult {
        // Bounded by the check interval, never by a caller deadline
        let ctx = Context::background().with_timeout(self.interval);
        let outcome = ping_once(&self.pool, &ctx).await;
        let result = match &outcome {
            Ok(()) => CheckResult::Success,
            Err(_) => CheckResult::Failure,
        };
        metrics().record_health_check(&self.node, result.as_str());

        match (self.state.record(result), outcome) {
            (Some(status), Err(e)) => {
                metrics().record_status_change(&self.node, status);
                warn!(node = %self.node, error = %e, status = %status, "Node status changed");
            }
            (Some(status), Ok(())) => {
                metrics().record_status_change(&self.node, status);
                info!(node = %self.node, status = %status, "Node status changed");
            }
            (None, Err(e)) => {
                warn!(node = %self.node, error = %e, confidence = self.state.confidence(), "Health check failed");
            }
            (None, Ok(())) => {
                debug!(node = %self.node, "Health check passed");
            }
        }
        result
    }
}
