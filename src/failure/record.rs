//! Failure record and its read projections.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::policy::EffectiveAutoDisableConfig;

/// Store key for a (vendor, model) pair: `"vendor:model"`.
#[must_use]
pub fn pair_key(vendor: &str, model: &str) -> String {
    format!("{vendor}:{model}")
}

/// Split a `"vendor:model"` id at the first colon.
///
/// Model names may themselves contain colons; vendor names may not.
#[must_use]
pub fn split_pair_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// Start and end of a disable window. Both instants are always set together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableWindow {
    /// When the pair was disabled
    pub disabled_at: DateTime<Utc>,
    /// When the disable expires
    pub disabled_until: DateTime<Utc>,
}

/// Lifecycle state of a pair at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Routable
    Enabled,
    /// Excluded from routing until `disabled_until`
    Disabled,
    /// Disable window elapsed but not yet swept; routable
    ExpiredDisabled,
}

/// Mutable failure state for one (vendor, model) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Vendor name
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Failures in the current window
    pub failure_count: u32,
    /// Start of the current counting window
    pub first_failure: Option<DateTime<Utc>>,
    /// Most recent failure
    pub last_failure: Option<DateTime<Utc>>,
    /// Active (or expired, unswept) disable window
    pub disable: Option<DisableWindow>,
    /// Policy resolved when the record was created
    pub effective_config: EffectiveAutoDisableConfig,
}

impl FailureRecord {
    /// Fresh record with no failures
    #[must_use]
    pub fn new(vendor: &str, model: &str, effective_config: EffectiveAutoDisableConfig) -> Self {
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            failure_count: 0,
            first_failure: None,
            last_failure: None,
            disable: None,
            effective_config,
        }
    }

    /// State of this record at `now`
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> PairState {
        match self.disable {
            None => PairState::Enabled,
            Some(window) if now < window.disabled_until => PairState::Disabled,
            Some(_) => PairState::ExpiredDisabled,
        }
    }

    /// Whether the record is disabled at `now`
    #[must_use]
    pub fn is_disabled_at(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == PairState::Disabled
    }

    /// When the record was disabled, if it is
    #[must_use]
    pub fn disabled_at(&self) -> Option<DateTime<Utc>> {
        self.disable.map(|w| w.disabled_at)
    }

    /// When the disable expires, if disabled
    #[must_use]
    pub fn disabled_until(&self) -> Option<DateTime<Utc>> {
        self.disable.map(|w| w.disabled_until)
    }

    /// Clear counters and the disable window. The snapshotted policy stays.
    pub fn reset(&mut self) {
        self.failure_count = 0;
        self.first_failure = None;
        self.last_failure = None;
        self.disable = None;
    }

    /// Project into a [`DisabledModel`] if disabled at `now`
    #[must_use]
    pub fn disabled_view(&self, now: DateTime<Utc>) -> Option<DisabledModel> {
        let window = self.disable.filter(|w| now < w.disabled_until)?;
        let remaining_time = (window.disabled_until - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(DisabledModel {
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            failure_count: self.failure_count,
            disabled_at: window.disabled_at,
            disabled_until: window.disabled_until,
            remaining_time,
            failure_threshold: self.effective_config.failure_threshold,
        })
    }
}

/// A currently disabled pair, computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisabledModel {
    /// Vendor name
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Failures counted when the snapshot was taken
    pub failure_count: u32,
    /// When the pair was disabled
    pub disabled_at: DateTime<Utc>,
    /// When the disable expires
    pub disabled_until: DateTime<Utc>,
    /// Time left in the disable window
    #[serde(with = "crate::config::humantime_serde")]
    pub remaining_time: Duration,
    /// Threshold from the snapshotted policy
    pub failure_threshold: u32,
}
