use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::JobStore;

/// Periodically deletes job records past their TTL until `shutdown` flips.
pub fn spawn_reaper(
    store: Arc<JobStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.purge_expired(Utc::now()) {
                        Ok(0) => debug!("No expired jobs"),
                        Ok(removed) => info!(removed, "Purged expired jobs"),
                        Err(e) => warn!(error = %e, "Failed to purge expired jobs"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Reaper stopped");
    })
}
