//! Background eviction of idle keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;
use crate::error::{GatekeeperError, Result};

/// Handle to a running sweeper task.
///
/// Dropping the handle without calling [`SweeperHandle::shutdown`] leaves
/// the task running until the runtime stops.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Periodically evict keys idle for at least `idle_ttl`.
///
/// Must be called from within a tokio runtime. A zero `interval` is a
/// configuration error.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    idle_ttl: Duration,
) -> Result<SweeperHandle> {
    if interval.is_zero() {
        return Err(GatekeeperError::Config(
            "sweep interval must be positive".to_string(),
        ));
    }

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?interval,
            idle_ttl = ?idle_ttl,
            "Starting idle key sweeper"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = limiter.evict_idle(idle_ttl);
                    if evicted > 0 {
                        info!(
                            evicted = evicted,
                            remaining = limiter.key_count(),
                            "Evicted idle rate limit keys"
                        );
                    } else {
                        debug!("Sweep found no idle keys");
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("Idle key sweeper stopping");
                    break;
                }
            }
        }
    });

    Ok(SweeperHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}
