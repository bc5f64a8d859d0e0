//! Background work owned by the store: restore and periodic cleanup.

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use strand_dht::{Dht, current_unix_timestamp};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{PersistentStore, StoreError, StoreResult};

/// Outcome of a restore pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Records republished.
    pub republished: u64,
    /// Records whose republish or read failed.
    pub failed: u64,
    /// Records skipped because they had expired.
    pub expired: u64,
    /// Whether the pass stopped early because the store closed.
    pub cancelled: bool,
}

impl PersistentStore {
    /// Republish every stored, non-expired value onto `dht` in the background.
    ///
    /// Values go out as the exact packed bytes that were stored, so ownership
    /// and signatures survive. Runs at most once per store; reads and writes
    /// keep working while it runs. Must be called from within a tokio runtime.
    pub fn restore_async<D>(self: &Arc<Self>, dht: Arc<D>) -> StoreResult<()>
    where
        D: Dht + ?Sized + 'static,
    {
        self.ensure_open()?;
        if self.restore_started.swap(true, Ordering::SeqCst) {
            return Err(StoreError::RestoreAlreadyStarted);
        }

        self.set_restoring(true);
        let store = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let report = store.run_restore(dht.as_ref(), shutdown).await;
            store.set_restoring(false);
            report
        });
        *self.restore_task.lock() = Some(handle);
        Ok(())
    }

    /// Wait for the restore pass to finish.
    ///
    /// Returns `None` if no restore was started, it was already awaited, or
    /// the task panicked.
    pub async fn wait_for_restore(&self) -> Option<RestoreReport> {
        let handle = self.restore_task.lock().take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "restore task failed");
                None
            }
        }
    }

    async fn run_restore<D>(
        self: &Arc<Self>,
        dht: &D,
        mut shutdown: watch::Receiver<bool>,
    ) -> RestoreReport
    where
        D: Dht + ?Sized,
    {
        let mut report = RestoreReport::default();
        let store = Arc::clone(self);
        let keys = match blocking(move || store.snapshot_keys()).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "restore could not list records");
                return report;
            }
        };
        info!(records = keys.len(), "restoring persisted values");

        for (key, value_id) in keys {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }

            let store = Arc::clone(self);
            let record = match blocking(move || store.load(&key, value_id)).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(StoreError::Closed) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    warn!(%key, value_id, error = %err, "failed to read record for restore");
                    report.failed += 1;
                    self.record_republish(false);
                    continue;
                }
            };

            if record.is_expired(current_unix_timestamp()) {
                report.expired += 1;
                continue;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    report.cancelled = true;
                    break;
                }
                result = dht.republish(&key, &record.packed_value) => match result {
                    Ok(()) => {
                        report.republished += 1;
                        self.record_republish(true);
                    }
                    Err(err) => {
                        debug!(%key, value_id, error = %err, "republish failed");
                        report.failed += 1;
                        self.record_republish(false);
                    }
                },
            }
        }

        info!(
            republished = report.republished,
            failed = report.failed,
            expired = report.expired,
            cancelled = report.cancelled,
            "restore finished"
        );
        report
    }

    /// Run [`cleanup`](Self::cleanup) at the configured interval until the
    /// store closes.
    pub fn start_cleanup(self: &Arc<Self>) -> StoreResult<()> {
        self.spawn_cleanup_task(self.cleanup_interval())
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until the store closes.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> StoreResult<()> {
        self.ensure_open()?;
        let period = Self::cleanup_period(interval);
        let store = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("cleanup task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        match blocking(move || store.cleanup()).await {
                            Ok(_) => {}
                            Err(StoreError::Closed) => break,
                            Err(err) => warn!(error = %err, "periodic cleanup failed"),
                        }
                    }
                }
            }
        });
        self.background.lock().push(handle);
        Ok(())
    }
}

/// Run database work off the async workers.
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| StoreError::Database(format!("blocking task failed: {err}")))?
}
