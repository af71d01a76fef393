//! Background compaction of expired entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::store::Store;

/// Sweep expired entries every `interval` until shutdown is signaled.
///
/// A sweep that is in progress when shutdown arrives runs to completion.
#[instrument(skip(store, shutdown))]
pub(crate) async fn run(store: Arc<Store>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    debug!(interval_secs = interval.as_secs(), "Starting cache sweeper");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.sweep()).await {
                    Ok(Ok(removed)) => {
                        if removed > 0 {
                            info!(removed = removed, "Swept expired cache entries");
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "Cache sweep failed"),
                    Err(e) => warn!(error = %e, "Cache sweep task failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Cache sweeper shutting down");
                    break;
                }
            }
        }
    }
}
