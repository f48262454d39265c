//! Operator operations on auto-disabled models.
//!
//! Transport-agnostic: every operation returns a `Serialize` response whose
//! JSON shape is what the management API serves. Without a tracker each
//! operation answers with a "not enabled" message instead of failing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::failure::{DisabledModel, FailureTracker, split_pair_key};
use crate::{Error, Result};

/// Message returned when no tracker is configured
pub const TRACKING_NOT_ENABLED: &str = "failure tracking not enabled";

/// Outcome of a mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// The operation ran
    Success,
    /// Nothing to act on
    Noop,
}

/// One disabled pair as listed by [`FailureAdmin::list_disabled`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisabledModelEntry {
    /// Vendor name
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Failures counted so far
    pub failure_count: u32,
    /// When the pair was disabled
    pub disabled_at: DateTime<Utc>,
    /// When the disable expires
    pub disabled_until: DateTime<Utc>,
    /// Whole seconds left
    pub remaining_seconds: u64,
    /// Threshold that was crossed
    pub failure_threshold: u32,
}

impl From<DisabledModel> for DisabledModelEntry {
    fn from(dm: DisabledModel) -> Self {
        Self {
            vendor: dm.vendor,
            model: dm.model,
            failure_count: dm.failure_count,
            disabled_at: dm.disabled_at,
            disabled_until: dm.disabled_until,
            remaining_seconds: dm.remaining_time.as_secs(),
            failure_threshold: dm.failure_threshold,
        }
    }
}

/// Response of [`FailureAdmin::list_disabled`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisabledModelsResponse {
    /// Disabled pairs sorted by vendor then model
    pub models: Vec<DisabledModelEntry>,
    /// Number of entries
    pub count: usize,
    /// Set when tracking is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of [`FailureAdmin::model_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatusResponse {
    /// Vendor name
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Currently auto-disabled
    pub disabled: bool,
    /// Failures counted in the current window
    pub failure_count: u32,
    /// Set when tracking is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of [`FailureAdmin::enable_model`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnableModelResponse {
    /// Whether anything ran
    pub status: ActionStatus,
    /// Vendor name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Model name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Human-readable result
    pub message: String,
}

/// Response of [`FailureAdmin::enable_all`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableAllResponse {
    /// Whether anything ran
    pub status: ActionStatus,
    /// Pairs re-enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_count: Option<usize>,
    /// Pairs that were disabled when the call started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_models: Option<usize>,
    /// Set when tracking is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parse a `vendor:model` id, splitting at the first colon.
///
/// # Errors
///
/// Returns `Error::InvalidModelId` if the id has no colon or either side is
/// empty.
pub fn parse_model_id(model_id: &str) -> Result<(&str, &str)> {
    match split_pair_key(model_id) {
        Some((vendor, model)) if !vendor.is_empty() && !model.is_empty() => Ok((vendor, model)),
        _ => Err(Error::InvalidModelId(model_id.to_string())),
    }
}

/// Management operations over an optional tracker.
#[derive(Clone, Default)]
pub struct FailureAdmin {
    tracker: Option<Arc<dyn FailureTracker>>,
}

impl FailureAdmin {
    /// Admin over `tracker`
    #[must_use]
    pub fn new(tracker: Option<Arc<dyn FailureTracker>>) -> Self {
        Self { tracker }
    }

    /// Swap the tracker (or remove it)
    pub fn set_tracker(&mut self, tracker: Option<Arc<dyn FailureTracker>>) {
        self.tracker = tracker;
    }

    /// Every currently disabled pair
    #[must_use]
    pub fn list_disabled(&self) -> DisabledModelsResponse {
        let Some(tracker) = &self.tracker else {
            return DisabledModelsResponse {
                models: Vec::new(),
                count: 0,
                message: Some(TRACKING_NOT_ENABLED.to_string()),
            };
        };

        let models: Vec<DisabledModelEntry> = tracker
            .disabled_models()
            .into_iter()
            .map(DisabledModelEntry::from)
            .collect();
        DisabledModelsResponse {
            count: models.len(),
            models,
            message: None,
        }
    }

    /// Status of one pair given as `vendor:model`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidModelId` for a malformed id, or the tracker's
    /// error.
    pub fn model_status(&self, model_id: &str) -> Result<ModelStatusResponse> {
        let (vendor, model) = parse_model_id(model_id)?;

        let Some(tracker) = &self.tracker else {
            return Ok(ModelStatusResponse {
                vendor: vendor.to_string(),
                model: model.to_string(),
                disabled: false,
                failure_count: 0,
                message: Some(TRACKING_NOT_ENABLED.to_string()),
            });
        };

        Ok(ModelStatusResponse {
            vendor: vendor.to_string(),
            model: model.to_string(),
            disabled: tracker.is_disabled(vendor, model)?,
            failure_count: tracker.failure_count(vendor, model)?,
            message: None,
        })
    }

    /// Manually re-enable one pair given as `vendor:model`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidModelId` for a malformed id, or the tracker's
    /// error.
    pub fn enable_model(&self, model_id: &str) -> Result<EnableModelResponse> {
        let (vendor, model) = parse_model_id(model_id)?;

        let Some(tracker) = &self.tracker else {
            return Ok(EnableModelResponse {
                status: ActionStatus::Noop,
                vendor: None,
                model: None,
                message: TRACKING_NOT_ENABLED.to_string(),
            });
        };

        tracker.enable_model(vendor, model)?;
        info!(vendor = %vendor, model = %model, "Model re-enabled via management API");

        Ok(EnableModelResponse {
            status: ActionStatus::Success,
            vendor: Some(vendor.to_string()),
            model: Some(model.to_string()),
            message: "model re-enabled successfully".to_string(),
        })
    }

    /// Re-enable every currently disabled pair.
    ///
    /// Pairs the tracker fails to enable are logged and left out of
    /// `enabled_count`.
    #[must_use]
    pub fn enable_all(&self) -> EnableAllResponse {
        let Some(tracker) = &self.tracker else {
            return EnableAllResponse {
                status: ActionStatus::Noop,
                enabled_count: None,
                total_models: None,
                message: Some(TRACKING_NOT_ENABLED.to_string()),
            };
        };

        let disabled = tracker.disabled_models();
        let total = disabled.len();
        let mut enabled = 0;
        for dm in &disabled {
            match tracker.enable_model(&dm.vendor, &dm.model) {
                Ok(()) => enabled += 1,
                Err(e) => {
                    warn!(vendor = %dm.vendor, model = %dm.model, error = %e, "Failed to re-enable model");
                }
            }
        }
        info!(enabled, total, "Bulk re-enable finished");

        EnableAllResponse {
            status: ActionStatus::Success,
            enabled_count: Some(enabled),
            total_models: Some(total),
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::failure::MockFailureTracker;

    fn admin_with(mock: &Arc<MockFailureTracker>) -> FailureAdmin {
        FailureAdmin::new(Some(Arc::clone(mock) as Arc<dyn FailureTracker>))
    }

    #[test]
    fn parse_model_id_splits_at_first_colon() {
        assert_eq!(parse_model_id("openai:gpt-4").unwrap(), ("openai", "gpt-4"));
        assert_eq!(
            parse_model_id("ollama:llama3:70b").unwrap(),
            ("ollama", "llama3:70b")
        );
        for bad in ["", "gpt-4", ":gpt-4", "openai:"] {
            assert!(
                matches!(parse_model_id(bad), Err(Error::InvalidModelId(_))),
                "expected rejection of {bad:?}"
            );
        }
    }

    #[test]
    fn no_tracker_answers_not_enabled() {
        let admin = FailureAdmin::default();

        let list = serde_json::to_value(admin.list_disabled()).unwrap();
        assert_eq!(list["count"], 0);
        assert_eq!(list["message"], TRACKING_NOT_ENABLED);

        let status = admin.model_status("openai:gpt-4").unwrap();
        assert!(!status.disabled);
        assert_eq!(status.message.as_deref(), Some(TRACKING_NOT_ENABLED));

        let enable = serde_json::to_value(admin.enable_model("openai:gpt-4").unwrap()).unwrap();
        assert_eq!(enable["status"], "noop");

        let all = serde_json::to_value(admin.enable_all()).unwrap();
        assert_eq!(all["status"], "noop");
        assert!(all.get("enabledCount").is_none());
    }

    #[test]
    fn malformed_id_rejected_even_without_tracker() {
        let admin = FailureAdmin::default();
        assert!(admin.model_status("gpt-4").is_err());
        assert!(admin.enable_model("gpt-4").is_err());
    }

    #[test]
    fn list_and_status_reflect_tracker() {
        let mock = Arc::new(MockFailureTracker::new());
        mock.set_disabled("openai", "gpt-4", true);
        mock.set_failure_count("openai", "gpt-4", 6);
        let admin = admin_with(&mock);

        let list = admin.list_disabled();
        assert_eq!(list.count, 1);
        assert_eq!(list.models[0].remaining_seconds, 300);

        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["models"][0]["failureCount"], 6);
        assert!(json.get("message").is_none());

        let status = admin.model_status("openai:gpt-4").unwrap();
        assert_eq!(
            status,
            ModelStatusResponse {
                vendor: "openai".to_string(),
                model: "gpt-4".to_string(),
                disabled: true,
                failure_count: 6,
                message: None,
            }
        );
    }

    #[test]
    fn enable_model_reports_success() {
        let mock = Arc::new(MockFailureTracker::new());
        mock.set_disabled("claude", "claude-3-opus", true);
        let admin = admin_with(&mock);

        let resp = admin.enable_model("claude:claude-3-opus").unwrap();
        assert_eq!(resp.status, ActionStatus::Success);
        assert_eq!(resp.vendor.as_deref(), Some("claude"));
        assert!(!mock.is_disabled("claude", "claude-3-opus").unwrap());
    }

    #[test]
    fn enable_model_propagates_tracker_error() {
        let mock = Arc::new(MockFailureTracker::new());
        mock.fail_with(Some("locked"));
        let admin = admin_with(&mock);
        assert!(matches!(
            admin.enable_model("claude:claude-3-opus"),
            Err(Error::Tracker(_))
        ));
    }

    #[test]
    fn enable_all_counts() {
        // GIVEN: two disabled pairs and one enabled
        let mock = Arc::new(MockFailureTracker::new());
        mock.set_disabled("openai", "gpt-4", true);
        mock.set_disabled("gemini", "gemini-pro", true);
        mock.set_disabled("claude", "claude-3-opus", false);
        let admin = admin_with(&mock);

        // WHEN
        let resp = admin.enable_all();

        // THEN
        assert_eq!(resp.enabled_count, Some(2));
        assert_eq!(resp.total_models, Some(2));
        assert!(mock.disabled_models().is_empty());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["enabledCount"], 2);
        assert_eq!(json["totalModels"], 2);
    }
}
