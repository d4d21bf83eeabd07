//! Background Expiry Reaper
//!
//! Lazy expiry (checking on access) is cheap but leaves a hole: a key that
//! expires and is never touched again would sit in memory forever. The reaper
//! closes it by periodically sweeping the store and removing every entry
//! whose deadline has passed.
//!
//! The reaper runs as a Tokio task on a fixed interval and is stopped
//! cooperatively through a watch channel. Dropping the handle stops the task;
//! calling [`Reaper::stop`] more than once is harmless.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default sweep cadence.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_millis(500);

/// A handle to the running reaper task.
///
/// When this handle is dropped, the reaper task will be stopped.
#[derive(Debug)]
pub struct Reaper {
    shutdown_tx: watch::Sender<bool>,
}

impl Reaper {
    /// Starts the reaper as a background task sweeping `store` every
    /// `interval`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use cinderkv::storage::{Reaper, Store, DEFAULT_REAP_INTERVAL};
    /// use std::sync::Arc;
    ///
    /// let store = Arc::new(Store::new());
    /// let reaper = Reaper::start(store, DEFAULT_REAP_INTERVAL);
    ///
    /// // Dropping the handle stops the task.
    /// drop(reaper);
    /// ```
    pub fn start(store: Arc<Store>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_REAP_INTERVAL
        } else {
            interval
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(reap_loop(store, interval, shutdown_rx));
        info!(interval_ms = interval.as_millis() as u64, "expiry reaper started");

        Self { shutdown_tx }
    }

    /// Stops the reaper. Idempotent; also called on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The sweep loop: sleep, purge, repeat until told to stop.
async fn reap_loop(store: Arc<Store>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiry reaper received shutdown signal");
                    return;
                }
            }
        }

        let purged = store.purge_expired();
        if purged > 0 {
            debug!(purged, keys_remaining = store.len(), "expired keys reaped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[tokio::test]
    async fn test_reaper_deletes_expired_keys_without_access() {
        let store = Arc::new(Store::new());

        store.set(Bytes::from("a"), Bytes::from("1"));
        assert!(store.expire(b"a", 1));
        store.set(Bytes::from("keep"), Bytes::from("2"));

        let _reaper = Reaper::start(Arc::clone(&store), Duration::from_millis(50));

        // Wait past the deadline plus at least one sweep, without touching
        // the expired key.
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(store.len(), 1);
        assert!(store.exists(b"keep"));
    }

    #[tokio::test]
    async fn test_reaper_stops_on_drop() {
        let store = Arc::new(Store::new());

        {
            let _reaper = Reaper::start(Arc::clone(&store), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Reaper is dropped here.
        }

        store.set(Bytes::from("k"), Bytes::from("v"));
        assert!(store.expire_at(b"k", now_unix() + 1));

        tokio::time::sleep(Duration::from_millis(1300)).await;

        // No sweep ran, so only the lazy path can remove it now.
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(b"k"), None);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let store = Arc::new(Store::new());
        let reaper = Reaper::start(store, Duration::from_millis(10));

        reaper.stop();
        reaper.stop();
    }
}
