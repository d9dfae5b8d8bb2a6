//! Periodic removal of expired challenges and sessions.
//!
//! The sweep runs as its own task on a fixed interval, independent of request
//! traffic. A failed sweep is logged and retried at the next tick; it never
//! reaches a request path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::store::{SessionStore, SweepStats};

/// Delay before a panicked sweep task is restarted.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Runs one sweep, logging instead of returning failures.
pub async fn sweep_once(store: &dyn SessionStore) -> Option<SweepStats> {
    let start = Instant::now();

    match store.sweep_expired().await {
        Ok(stats) => {
            histogram!("auth.sweep.duration").record(start.elapsed().as_secs_f64());
            counter!("auth.sweep.removed").increment(stats.total());
            if stats.total() > 0 {
                info!(
                    challenges = stats.challenges_removed,
                    sessions = stats.sessions_removed,
                    "Swept expired state"
                );
            } else {
                debug!("Sweep found nothing to remove");
            }
            Some(stats)
        }
        Err(e) => {
            counter!("auth.sweep.failure").increment(1);
            error!(error = %e, "Expired state sweep failed");
            None
        }
    }
}

/// Spawns the sweep loop. It stops when `shutdown` changes or its sender is
/// dropped, and is restarted after [`RESTART_BACKOFF`] if it panics.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let worker = tokio::spawn(run(Arc::clone(&store), interval, shutdown.clone()));

            match worker.await {
                Ok(()) => break,
                Err(e) => error!("Sweep task panicked: {e:?}, restarting..."),
            }

            let mut shutdown = shutdown.clone();
            tokio::select! {
                _ = time::sleep(RESTART_BACKOFF) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("Sweeper stopped");
    })
}

async fn run(store: Arc<dyn SessionStore>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so startup does not sweep.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(store.as_ref()).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
