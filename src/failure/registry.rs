//! Process-wide default tracker.
//!
//! Prefer passing an `Arc<dyn FailureTracker>` to the components that need
//! it; this slot exists for call sites that cannot take one.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::tracker::{AutoDisableTracker, FailureTracker};
use crate::config::Config;

static GLOBAL_TRACKER: RwLock<Option<Arc<dyn FailureTracker>>> = parking_lot::const_rwlock(None);

/// Current global tracker, if one is installed
#[must_use]
pub fn global_tracker() -> Option<Arc<dyn FailureTracker>> {
    GLOBAL_TRACKER.read().clone()
}

/// Swap the global tracker and return the previous one without closing it.
pub fn replace_global_tracker(
    tracker: Option<Arc<dyn FailureTracker>>,
) -> Option<Arc<dyn FailureTracker>> {
    std::mem::replace(&mut *GLOBAL_TRACKER.write(), tracker)
}

/// Install `tracker` globally and close the one it replaces.
pub async fn install_global_tracker(tracker: Option<Arc<dyn FailureTracker>>) {
    if let Some(previous) = replace_global_tracker(tracker) {
        previous.close().await;
        info!("Previous global failure tracker closed");
    }
}

/// Build a tracker from `config` and install it as the global one.
///
/// Must be called from within a tokio runtime.
pub async fn init_global_tracker(config: &Config) -> Arc<dyn FailureTracker> {
    let tracker: Arc<dyn FailureTracker> = Arc::new(AutoDisableTracker::from_config(config));
    install_global_tracker(Some(Arc::clone(&tracker))).await;
    info!(
        check_interval_ms = config.tracker.check_interval.as_millis(),
        "Global failure tracker initialized"
    );
    tracker
}
