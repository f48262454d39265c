//! Routing integration: combines static enable flags with auto-disable state.
//!
//! The two sources stay independent. Configuration owns the static flag,
//! the failure tracker owns the dynamic one; only this gate looks at both.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::failure::FailureTracker;
use crate::{Error, Result};

/// A (vendor, model) pair the router may dispatch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Canonical vendor name
    pub vendor: String,
    /// Upstream model name
    pub model: String,
    /// Static enable flag from configuration, if any
    pub explicit_enabled: Option<bool>,
}

impl Candidate {
    /// Candidate without a static opinion
    #[must_use]
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            model: model.into(),
            explicit_enabled: None,
        }
    }

    /// Attach a static enable flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: Option<bool>) -> Self {
        self.explicit_enabled = enabled;
        self
    }

    /// Every configured vendor offering `model`, in configuration order.
    ///
    /// An alias is first resolved to its upstream model name across the
    /// whole configuration, so vendors that list the model without the
    /// alias are still offered as fallbacks.
    #[must_use]
    pub fn from_config(config: &Config, model: &str) -> Vec<Self> {
        let upstream = config.upstream_model(model);
        config
            .vendors
            .iter()
            .filter(|v| v.models.iter().any(|m| m.name == upstream))
            .map(|v| {
                Self::new(&v.name, upstream)
                    .with_enabled(config.explicit_enabled(&v.name, upstream))
            })
            .collect()
    }
}

/// Gate consulted by the router before dispatch.
#[derive(Clone, Default)]
pub struct RoutingGate {
    tracker: Option<Arc<dyn FailureTracker>>,
}

impl RoutingGate {
    /// Gate backed by `tracker`
    #[must_use]
    pub fn new(tracker: Arc<dyn FailureTracker>) -> Self {
        Self {
            tracker: Some(tracker),
        }
    }

    /// Gate that only honours static flags
    #[must_use]
    pub fn without_tracker() -> Self {
        Self::default()
    }

    /// Whether the tracker currently auto-disables the pair.
    ///
    /// # Errors
    ///
    /// Propagates tracker errors.
    pub fn is_model_disabled(&self, vendor: &str, model: &str) -> Result<bool> {
        match &self.tracker {
            Some(tracker) => tracker.is_disabled(vendor, model),
            None => Ok(false),
        }
    }

    /// Whether the router may use this pair right now.
    ///
    /// `Some(false)` wins without consulting the tracker. A tracker error is
    /// logged and the pair is treated as not disabled.
    #[must_use]
    pub fn is_enabled_for_routing(&self, vendor: &str, model: &str, explicit: Option<bool>) -> bool {
        if explicit == Some(false) {
            return false;
        }

        match self.is_model_disabled(vendor, model) {
            Ok(disabled) => !disabled,
            Err(e) => {
                warn!(vendor = %vendor, model = %model, error = %e, "Failure tracker query failed, routing anyway");
                true
            }
        }
    }

    /// Candidates usable right now, order preserved
    #[must_use]
    pub fn filter_enabled<'a>(&self, candidates: &'a [Candidate]) -> Vec<&'a Candidate> {
        candidates
            .iter()
            .filter(|c| self.is_enabled_for_routing(&c.vendor, &c.model, c.explicit_enabled))
            .collect()
    }

    /// First usable candidate for `requested_model`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoAvailableVendor` if every candidate is disabled.
    pub fn select<'a>(&self, requested_model: &str, candidates: &'a [Candidate]) -> Result<&'a Candidate> {
        for candidate in candidates {
            if self.is_enabled_for_routing(&candidate.vendor, &candidate.model, candidate.explicit_enabled) {
                return Ok(candidate);
            }
            debug!(
                vendor = %candidate.vendor,
                model = %candidate.model,
                "Skipping disabled routing candidate"
            );
        }

        Err(Error::NoAvailableVendor {
            model: requested_model.to_string(),
        })
    }
}
