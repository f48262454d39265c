//! Scriptable [`FailureTracker`] for router and executor tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::RwLock;

use super::policy::DEFAULT_FAILURE_THRESHOLD;
use super::record::{DisabledModel, pair_key, split_pair_key};
use super::tracker::FailureTracker;
use crate::{Error, Result};

/// In-memory tracker whose disabled flags and counts are set directly.
///
/// Failures only count; they never disable a pair on their own.
#[derive(Debug, Default)]
pub struct MockFailureTracker {
    disabled: RwLock<HashMap<String, bool>>,
    counts: RwLock<HashMap<String, u32>>,
    fail_with: RwLock<Option<String>>,
    closed: RwLock<bool>,
}

impl MockFailureTracker {
    /// Empty mock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the disabled flag of a pair
    pub fn set_disabled(&self, vendor: &str, model: &str, disabled: bool) {
        self.disabled.write().insert(pair_key(vendor, model), disabled);
    }

    /// Force the failure count of a pair
    pub fn set_failure_count(&self, vendor: &str, model: &str, count: u32) {
        self.counts.write().insert(pair_key(vendor, model), count);
    }

    /// Make every fallible operation return [`Error::Tracker`] with `message`,
    /// or succeed again with `None`.
    pub fn fail_with(&self, message: Option<&str>) {
        *self.fail_with.write() = message.map(ToString::to_string);
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    fn check(&self) -> Result<()> {
        match self.fail_with.read().as_deref() {
            Some(message) => Err(Error::tracker(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FailureTracker for MockFailureTracker {
    fn track_failure(&self, vendor: &str, model: &str) -> Result<()> {
        self.check()?;
        *self.counts.write().entry(pair_key(vendor, model)).or_insert(0) += 1;
        Ok(())
    }

    fn track_success(&self, vendor: &str, model: &str) -> Result<()> {
        self.check()?;
        self.counts.write().insert(pair_key(vendor, model), 0);
        Ok(())
    }

    fn is_disabled(&self, vendor: &str, model: &str) -> Result<bool> {
        self.check()?;
        Ok(self
            .disabled
            .read()
            .get(&pair_key(vendor, model))
            .copied()
            .unwrap_or(false))
    }

    fn disabled_models(&self) -> Vec<DisabledModel> {
        let now = Utc::now();
        let counts = self.counts.read();
        let mut models: Vec<DisabledModel> = self
            .disabled
            .read()
            .iter()
            .filter(|(_, disabled)| **disabled)
            .filter_map(|(key, _)| {
                let (vendor, model) = split_pair_key(key)?;
                Some(DisabledModel {
                    vendor: vendor.to_string(),
                    model: model.to_string(),
                    failure_count: counts.get(key).copied().unwrap_or(0),
                    disabled_at: now,
                    disabled_until: now + TimeDelta::minutes(5),
                    remaining_time: Duration::from_secs(300),
                    failure_threshold: DEFAULT_FAILURE_THRESHOLD,
                })
            })
            .collect();
        models.sort_by(|a, b| (&a.vendor, &a.model).cmp(&(&b.vendor, &b.model)));
        models
    }

    fn enable_model(&self, vendor: &str, model: &str) -> Result<()> {
        self.check()?;
        let key = pair_key(vendor, model);
        self.disabled.write().remove(&key);
        self.counts.write().remove(&key);
        Ok(())
    }

    fn failure_count(&self, vendor: &str, model: &str) -> Result<u32> {
        self.check()?;
        Ok(self
            .counts
            .read()
            .get(&pair_key(vendor, model))
            .copied()
            .unwrap_or(0))
    }

    async fn close(&self) {
        *self.closed.write() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_state_is_reported() {
        let mock = MockFailureTracker::new();
        mock.set_disabled("openai", "gpt-4", true);
        mock.set_disabled("claude", "claude-3-opus", false);
        mock.set_failure_count("openai", "gpt-4", 7);

        assert!(mock.is_disabled("openai", "gpt-4").unwrap());
        assert!(!mock.is_disabled("claude", "claude-3-opus").unwrap());
        assert_eq!(mock.failure_count("openai", "gpt-4").unwrap(), 7);

        let disabled = mock.disabled_models();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].failure_count, 7);
    }

    #[test]
    fn failures_count_but_never_disable() {
        let mock = MockFailureTracker::new();
        for _ in 0..10 {
            mock.track_failure("openai", "gpt-4").unwrap();
        }
        assert_eq!(mock.failure_count("openai", "gpt-4").unwrap(), 10);
        assert!(!mock.is_disabled("openai", "gpt-4").unwrap());

        mock.track_success("openai", "gpt-4").unwrap();
        assert_eq!(mock.failure_count("openai", "gpt-4").unwrap(), 0);
    }

    #[test]
    fn fail_with_errors_every_fallible_call() {
        let mock = MockFailureTracker::new();
        mock.fail_with(Some("store unavailable"));
        assert!(matches!(
            mock.track_failure("openai", "gpt-4"),
            Err(Error::Tracker(ref m)) if m == "store unavailable"
        ));
        assert!(mock.is_disabled("openai", "gpt-4").is_err());
        assert!(mock.enable_model("openai", "gpt-4").is_err());

        mock.fail_with(None);
        assert!(mock.track_failure("openai", "gpt-4").is_ok());
    }

    #[test]
    fn close_is_recorded() {
        let mock = MockFailureTracker::new();
        assert!(!mock.is_closed());
        tokio_test::block_on(mock.close());
        assert!(mock.is_closed());
    }
}
