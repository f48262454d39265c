//! Failure tracker state machine.
//!
//! Per (vendor, model) pair:
//!
//! ```text
//!             threshold failures within window
//!   Enabled ─────────────────────────────────────▶ Disabled
//!      ▲                                             │ now >= disabled_until
//!      │  sweep / next write / manual enable         ▼
//!      └─────────────────────────────────────── ExpiredDisabled
//! ```
//!
//! `Disabled` only leaves through expiry or [`FailureTracker::enable_model`];
//! successes observed while disabled are ignored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::policy::{EffectiveAutoDisableConfig, PolicyTable};
use super::reenable::{DEFAULT_CHECK_INTERVAL, ReenableLoop};
use super::record::{DisableWindow, DisabledModel, FailureRecord, PairState, pair_key};
use super::store::{RecordStore, ShardedRecordStore};
use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::config::{AutoDisableConfig, Config, StaleWindowPolicy};

/// Tracks failures per (vendor, model) pair and decides whether a pair is
/// currently usable.
#[async_trait]
pub trait FailureTracker: Send + Sync {
    /// Record a failed upstream call
    fn track_failure(&self, vendor: &str, model: &str) -> Result<()>;

    /// Record a successful upstream call
    fn track_success(&self, vendor: &str, model: &str) -> Result<()>;

    /// Whether the pair is currently auto-disabled
    fn is_disabled(&self, vendor: &str, model: &str) -> Result<bool>;

    /// Every pair disabled right now
    fn disabled_models(&self) -> Vec<DisabledModel>;

    /// Manually re-enable a pair and clear its counters
    fn enable_model(&self, vendor: &str, model: &str) -> Result<()>;

    /// Failures counted in the current window
    fn failure_count(&self, vendor: &str, model: &str) -> Result<u32>;

    /// Stop background work and wait for it to finish
    async fn close(&self);
}

/// Builder for [`AutoDisableTracker`]
pub struct TrackerBuilder {
    policies: PolicyTable,
    check_interval: Duration,
    stale_window: StaleWindowPolicy,
    clock: Arc<dyn Clock>,
    store: Arc<dyn RecordStore>,
}

impl TrackerBuilder {
    /// Auto-disable policies to resolve new records against
    #[must_use]
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Interval of the auto-reenable sweep
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Stale counting window handling
    #[must_use]
    pub fn stale_window(mut self, policy: StaleWindowPolicy) -> Self {
        self.stale_window = policy;
        self
    }

    /// Time source
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record storage
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = store;
        self
    }

    /// Build the tracker and spawn its auto-reenable loop.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(self) -> AutoDisableTracker {
        let reenable = ReenableLoop::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.check_interval,
        );

        AutoDisableTracker {
            store: self.store,
            clock: self.clock,
            policies: RwLock::new(Arc::new(self.policies)),
            stale_window: self.stale_window,
            reenable: Mutex::new(Some(reenable)),
        }
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self {
            policies: PolicyTable::default(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            stale_window: StaleWindowPolicy::default(),
            clock: Arc::new(SystemClock),
            store: Arc::new(ShardedRecordStore::new()),
        }
    }
}

/// In-memory [`FailureTracker`] with a background auto-reenable sweep.
pub struct AutoDisableTracker {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    policies: RwLock<Arc<PolicyTable>>,
    stale_window: StaleWindowPolicy,
    reenable: Mutex<Option<ReenableLoop>>,
}

/// What a single `track_failure` call did to its record
#[derive(Debug, Default)]
struct FailureOutcome {
    count: u32,
    threshold: u32,
    disabled_until: Option<DateTime<Utc>>,
    window_restarted: bool,
    expired_cleared: bool,
}

impl AutoDisableTracker {
    /// Builder with defaults: hard-default policy, 10s sweep, system clock
    #[must_use]
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::default()
    }

    /// Tracker with only a global policy block
    #[must_use]
    pub fn new(global: Option<AutoDisableConfig>) -> Self {
        Self::builder()
            .policies(PolicyTable::with_global(global))
            .start()
    }

    /// Tracker configured from the loaded configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::builder()
            .policies(PolicyTable::from_config(config))
            .check_interval(config.tracker.check_interval)
            .stale_window(config.tracker.stale_window)
            .start()
    }

    /// Replace the policy table.
    ///
    /// A record mid-episode keeps the policy it snapshotted; the new table
    /// applies once the record is cleared (success, expiry or manual enable)
    /// and to records created afterwards.
    pub fn update_policies(&self, policies: PolicyTable) {
        *self.policies.write() = Arc::new(policies);
        debug!("Auto-disable policies replaced");
    }

    /// Policy a new record for this pair would be created with
    #[must_use]
    pub fn effective_config(&self, vendor: &str, model: &str) -> EffectiveAutoDisableConfig {
        self.policies.read().resolve(vendor, model)
    }

    /// Copy of the stored record for a pair
    #[must_use]
    pub fn record(&self, vendor: &str, model: &str) -> Option<FailureRecord> {
        self.store.load(&pair_key(vendor, model))
    }

    /// Number of pairs that have ever failed
    #[must_use]
    pub fn tracked_pairs(&self) -> usize {
        self.store.len()
    }

    fn apply_failure(
        &self,
        record: &mut FailureRecord,
        now: DateTime<Utc>,
        created: bool,
    ) -> FailureOutcome {
        let mut outcome = FailureOutcome::default();

        if record.state(now) == PairState::ExpiredDisabled {
            record.reset();
            outcome.expired_cleared = true;
        }

        // A cleared record starts a new counting episode under the current
        // policy table.
        if !created && record.failure_count == 0 && record.first_failure.is_none() {
            record.effective_config = self.effective_config(&record.vendor, &record.model);
        }

        let cfg = record.effective_config;
        let window = cfg.time_window();

        match record.first_failure {
            None => {
                record.failure_count = 1;
                record.first_failure = Some(now);
            }
            Some(first)
                if self.stale_window == StaleWindowPolicy::Restart
                    && record.disable.is_none()
                    && !within_window(first, now, window) =>
            {
                record.failure_count = 1;
                record.first_failure = Some(now);
                outcome.window_restarted = true;
            }
            Some(_) => {
                record.failure_count = record.failure_count.saturating_add(1);
            }
        }
        record.last_failure = Some(now);

        // An active window is never extended or overwritten.
        if record.disable.is_none()
            && let Some(first) = record.first_failure
            && within_window(first, now, window)
            && record.failure_count >= cfg.failure_threshold
        {
            let disabled_until = now
                .checked_add_signed(cfg.disable_duration())
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.disable = Some(DisableWindow {
                disabled_at: now,
                disabled_until,
            });
            outcome.disabled_until = Some(disabled_until);
        }

        outcome.count = record.failure_count;
        outcome.threshold = cfg.failure_threshold;
        outcome
    }
}

/// Whether `first` lies strictly inside the window ending at `now`.
fn within_window(first: DateTime<Utc>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    now.checked_sub_signed(window)
        .is_none_or(|window_start| first > window_start)
}

#[async_trait]
impl FailureTracker for AutoDisableTracker {
    #[tracing::instrument(level = "trace", skip(self))]
    fn track_failure(&self, vendor: &str, model: &str) -> Result<()> {
        let key = pair_key(vendor, model);
        let now = self.clock.now();

        let mut outcome = FailureOutcome::default();
        self.store.update(&key, &mut |slot| {
            let created = slot.is_none();
            let record = slot.get_or_insert_with(|| {
                FailureRecord::new(vendor, model, self.policies.read().resolve(vendor, model))
            });
            outcome = self.apply_failure(record, now, created);
        });

        telemetry_metrics::counter!(
            "modelgate_failures_total",
            "vendor" => vendor.to_string(),
            "model" => model.to_string()
        )
        .increment(1);

        if outcome.expired_cleared {
            info!(vendor = %vendor, model = %model, "Disable window expired before sweep, record cleared");
        }
        if outcome.window_restarted {
            debug!(vendor = %vendor, model = %model, "Counting window elapsed, restarted at this failure");
        }
        if let Some(until) = outcome.disabled_until {
            warn!(
                vendor = %vendor,
                model = %model,
                failures = outcome.count,
                threshold = outcome.threshold,
                disabled_until = %until,
                "Auto-disable triggered"
            );
            telemetry_metrics::counter!(
                "modelgate_auto_disabled_total",
                "vendor" => vendor.to_string(),
                "model" => model.to_string()
            )
            .increment(1);
        }

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn track_success(&self, vendor: &str, model: &str) -> Result<()> {
        let key = pair_key(vendor, model);

        // Hot path: nothing to reset, skip the write gate.
        match self.store.load(&key) {
            None => return Ok(()),
            Some(r) if r.failure_count == 0 && r.first_failure.is_none() && r.disable.is_none() => {
                return Ok(());
            }
            Some(_) => {}
        }

        let now = self.clock.now();
        let mut ignored = false;
        self.store.update(&key, &mut |slot| {
            let Some(record) = slot.as_mut() else {
                return;
            };
            match record.state(now) {
                PairState::Disabled => ignored = true,
                PairState::ExpiredDisabled => record.reset(),
                PairState::Enabled => {
                    record.failure_count = 0;
                    record.first_failure = None;
                }
            }
        });

        if ignored {
            debug!(vendor = %vendor, model = %model, "Model is disabled, success ignored until re-enabled");
        }

        Ok(())
    }

    fn is_disabled(&self, vendor: &str, model: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .store
            .load(&pair_key(vendor, model))
            .is_some_and(|r| r.is_disabled_at(now)))
    }

    fn disabled_models(&self) -> Vec<DisabledModel> {
        let now = self.clock.now();
        let mut disabled: Vec<DisabledModel> = self
            .store
            .snapshot()
            .iter()
            .filter_map(|r| r.disabled_view(now))
            .collect();
        disabled.sort_by(|a, b| (&a.vendor, &a.model).cmp(&(&b.vendor, &b.model)));
        disabled
    }

    fn enable_model(&self, vendor: &str, model: &str) -> Result<()> {
        let key = pair_key(vendor, model);
        let now = self.clock.now();

        let mut was_disabled = false;
        self.store.update(&key, &mut |slot| {
            if let Some(record) = slot.as_mut() {
                was_disabled = record.is_disabled_at(now);
                record.reset();
            }
        });

        if was_disabled {
            info!(vendor = %vendor, model = %model, "Model manually re-enabled");
            telemetry_metrics::counter!(
                "modelgate_reenabled_total",
                "vendor" => vendor.to_string(),
                "model" => model.to_string(),
                "trigger" => "manual"
            )
            .increment(1);
        }

        Ok(())
    }

    fn failure_count(&self, vendor: &str, model: &str) -> Result<u32> {
        Ok(self
            .store
            .load(&pair_key(vendor, model))
            .map_or(0, |r| r.failure_count))
    }

    async fn close(&self) {
        let reenable = self.reenable.lock().take();
        match reenable {
            Some(reenable) => reenable.stop().await,
            None => debug!("Failure tracker already closed"),
        }
    }
}

impl Drop for AutoDisableTracker {
    fn drop(&mut self) {
        if let Some(reenable) = self.reenable.get_mut().take() {
            drop(reenable.signal());
        }
    }
}
