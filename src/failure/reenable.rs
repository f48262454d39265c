//! Background sweep that re-enables pairs whose disable window has expired.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::record::{PairState, pair_key};
use super::store::RecordStore;
use crate::clock::Clock;

/// Default sweep interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Reset every record whose disable window has expired at `now`.
///
/// Candidates come from a lock-free snapshot; each one is re-checked under
/// the store's write gate so a record re-disabled in between is left alone.
/// Returns the `(vendor, model)` pairs that were re-enabled.
pub fn sweep_expired(store: &dyn RecordStore, now: DateTime<Utc>) -> Vec<(String, String)> {
    let mut reenabled = Vec::new();

    for candidate in store.snapshot() {
        if candidate.state(now) != PairState::ExpiredDisabled {
            continue;
        }

        let key = pair_key(&candidate.vendor, &candidate.model);
        let mut cleared = false;
        store.update(&key, &mut |slot| {
            if let Some(record) = slot.as_mut()
                && record.state(now) == PairState::ExpiredDisabled
            {
                record.reset();
                cleared = true;
            }
        });

        if cleared {
            info!(
                vendor = %candidate.vendor,
                model = %candidate.model,
                "Auto-re-enabling model after disable duration expired"
            );
            telemetry_metrics::counter!(
                "modelgate_reenabled_total",
                "vendor" => candidate.vendor.clone(),
                "model" => candidate.model.clone(),
                "trigger" => "expiry"
            )
            .increment(1);
            reenabled.push((candidate.vendor, candidate.model));
        }
    }

    reenabled
}

/// Handle to the running sweep task.
pub(crate) struct ReenableLoop {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReenableLoop {
    /// Spawn the sweep on the current tokio runtime.
    pub(crate) fn spawn(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            debug!(interval_ms = interval.as_millis(), "Auto-reenable loop started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Auto-reenable loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep_expired(store.as_ref(), clock.now());
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the task without waiting for it.
    pub(crate) fn signal(self) -> JoinHandle<()> {
        // The receiver is gone only if the task already exited.
        let _ = self.shutdown_tx.send(());
        self.handle
    }

    /// Signal the task and wait until it has exited.
    pub(crate) async fn stop(self) {
        let handle = self.signal();
        if let Err(e) = handle.await
            && e.is_panic()
        {
            tracing::error!("Auto-reenable loop panicked: {e}");
        }
    }
}
