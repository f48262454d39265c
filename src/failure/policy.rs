//! Three-level auto-disable policy resolution (model > vendor > global > default).

use std::collections::HashMap;

use chrono::TimeDelta;
use serde::Serialize;

use crate::Result;
use crate::config::{AutoDisableConfig, Config};

/// Hard default failure threshold
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Hard default counting window (seconds)
pub const DEFAULT_TIME_WINDOW_SECONDS: u64 = 60;
/// Hard default disable duration (seconds)
pub const DEFAULT_DISABLE_DURATION_SECONDS: u64 = 300;

/// Fully populated auto-disable policy for one (vendor, model) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveAutoDisableConfig {
    /// Failures within the window that trigger a disable
    pub failure_threshold: u32,
    /// Counting window in seconds
    pub time_window_seconds: u64,
    /// Disable duration in seconds
    pub disable_duration_seconds: u64,
}

impl Default for EffectiveAutoDisableConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            time_window_seconds: DEFAULT_TIME_WINDOW_SECONDS,
            disable_duration_seconds: DEFAULT_DISABLE_DURATION_SECONDS,
        }
    }
}

impl EffectiveAutoDisableConfig {
    /// Counting window as a signed duration
    #[must_use]
    pub fn time_window(&self) -> TimeDelta {
        secs_to_delta(self.time_window_seconds)
    }

    /// Disable duration as a signed duration
    #[must_use]
    pub fn disable_duration(&self) -> TimeDelta {
        secs_to_delta(self.disable_duration_seconds)
    }
}

fn secs_to_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Resolve the effective policy from the three configuration levels.
///
/// The most specific block present wins as a whole; unset fields inside it
/// come from the hard default, never from a broader level.
#[must_use]
pub fn resolve_effective_config(
    global: Option<&AutoDisableConfig>,
    vendor: Option<&AutoDisableConfig>,
    model: Option<&AutoDisableConfig>,
) -> EffectiveAutoDisableConfig {
    model
        .or(vendor)
        .or(global)
        .map_or_else(EffectiveAutoDisableConfig::default, AutoDisableConfig::effective)
}

#[derive(Debug, Clone, Default)]
struct VendorPolicies {
    block: Option<AutoDisableConfig>,
    /// `(name, alias, block)` for models with their own block
    models: Vec<(String, Option<String>, AutoDisableConfig)>,
}

/// Auto-disable blocks indexed by canonical vendor and model name.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    global: Option<AutoDisableConfig>,
    vendors: HashMap<String, VendorPolicies>,
}

impl PolicyTable {
    /// Table with only a global block
    #[must_use]
    pub fn with_global(global: Option<AutoDisableConfig>) -> Self {
        Self {
            global,
            vendors: HashMap::new(),
        }
    }

    /// Index every auto-disable block declared in `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let vendors = config
            .vendors
            .iter()
            .map(|v| {
                let models = v
                    .models
                    .iter()
                    .filter_map(|m| {
                        m.auto_disable
                            .map(|block| (m.name.clone(), m.alias.clone(), block))
                    })
                    .collect();
                (
                    v.name.clone(),
                    VendorPolicies {
                        block: v.auto_disable,
                        models,
                    },
                )
            })
            .collect();

        Self {
            global: config.auto_disable,
            vendors,
        }
    }

    /// Set or replace the block for a single vendor
    #[must_use]
    pub fn with_vendor(mut self, vendor: &str, block: AutoDisableConfig) -> Self {
        self.vendors.entry(vendor.to_string()).or_default().block = Some(block);
        self
    }

    /// Set or replace the block for a single model under `vendor`
    #[must_use]
    pub fn with_model(mut self, vendor: &str, model: &str, block: AutoDisableConfig) -> Self {
        let entry = self.vendors.entry(vendor.to_string()).or_default();
        entry.models.retain(|(name, _, _)| name != model);
        entry.models.push((model.to_string(), None, block));
        self
    }

    /// Effective policy for a pair
    #[must_use]
    pub fn resolve(&self, vendor: &str, model: &str) -> EffectiveAutoDisableConfig {
        let vendor_policies = self.vendors.get(vendor);
        let model_block = vendor_policies.and_then(|v| {
            v.models
                .iter()
                .find(|(name, alias, _)| name == model || alias.as_deref() == Some(model))
                .map(|(_, _, block)| block)
        });
        resolve_effective_config(
            self.global.as_ref(),
            vendor_policies.and_then(|v| v.block.as_ref()),
            model_block,
        )
    }
}

/// Configuration level a pair's policy came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    /// Model-level block
    Model,
    /// Vendor-level block
    Vendor,
    /// Global block
    Global,
    /// Hard default
    Default,
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Model => "model",
            Self::Vendor => "vendor",
            Self::Global => "global",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

/// Effective policy of one configured pair, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairPolicy {
    /// Vendor name
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Model alias
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Static enable flag after vendor/model precedence
    pub enabled: bool,
    /// Where the policy came from
    pub source: PolicySource,
    /// The policy itself
    #[serde(flatten)]
    pub policy: EffectiveAutoDisableConfig,
}

/// Effective policy for every model declared in `config`, in file order.
#[must_use]
pub fn describe_policies(config: &Config) -> Vec<PairPolicy> {
    config
        .vendors
        .iter()
        .flat_map(|v| {
            v.models.iter().map(move |m| {
                let source = if m.auto_disable.is_some() {
                    PolicySource::Model
                } else if v.auto_disable.is_some() {
                    PolicySource::Vendor
                } else if config.auto_disable.is_some() {
                    PolicySource::Global
                } else {
                    PolicySource::Default
                };
                PairPolicy {
                    vendor: v.name.clone(),
                    model: m.name.clone(),
                    alias: m.alias.clone(),
                    enabled: config.explicit_enabled(&v.name, &m.name).unwrap_or(true),
                    source,
                    policy: resolve_effective_config(
                        config.auto_disable.as_ref(),
                        v.auto_disable.as_ref(),
                        m.auto_disable.as_ref(),
                    ),
                }
            })
        })
        .collect()
}

/// [`describe_policies`] rendered as pretty-printed JSON.
///
/// # Errors
///
/// Returns `Error::Json` if serialization fails.
pub fn policies_json(config: &Config) -> Result<String> {
    Ok(serde_json::to_string_pretty(&describe_policies(config))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_reports_source_level() {
        let yaml = r"
auto_disable: { failure_threshold: 9 }
vendors:
  - name: claude
    enabled: false
    auto_disable: { failure_threshold: 4 }
    models:
      - name: claude-3-sonnet
        auto_disable: { failure_threshold: 3 }
      - name: claude-3-opus
  - name: openai
    models:
      - name: gpt-4
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let rows = describe_policies(&config);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].source, PolicySource::Model);
        assert_eq!(rows[0].policy.failure_threshold, 3);
        assert!(!rows[0].enabled);
        assert_eq!(rows[1].source, PolicySource::Vendor);
        assert_eq!(rows[2].source, PolicySource::Global);
        assert_eq!(rows[2].policy.failure_threshold, 9);
        assert!(rows[2].enabled);

        let json = serde_json::to_value(&rows[2]).unwrap();
        assert_eq!(json["failureThreshold"], 9);
        assert_eq!(json["source"], "global");
    }

    #[test]
    fn policies_json_lists_every_model() {
        // GIVEN: a vendor with an aliased model
        let config: Config =
            serde_yaml::from_str("vendors: [{ name: claude, models: [{ name: claude-3-sonnet, alias: sonnet }] }]")
                .unwrap();

        // WHEN: rendered for the CLI
        let json: serde_json::Value = serde_json::from_str(&policies_json(&config).unwrap()).unwrap();

        // THEN: one row with the default policy
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["alias"], "sonnet");
        assert_eq!(json[0]["source"], "default");
        assert_eq!(json[0]["failureThreshold"], DEFAULT_FAILURE_THRESHOLD);
    }

    fn block(threshold: u32, window: u64, duration: u64) -> AutoDisableConfig {
        AutoDisableConfig {
            failure_threshold: threshold,
            time_window_seconds: window,
            disable_duration_seconds: duration,
        }
    }

    #[test]
    fn hard_default_when_nothing_configured() {
        let effective = resolve_effective_config(None, None, None);
        assert_eq!(effective, EffectiveAutoDisableConfig::default());
        assert_eq!(effective.failure_threshold, 5);
        assert_eq!(effective.time_window_seconds, 60);
        assert_eq!(effective.disable_duration_seconds, 300);
    }

    #[test]
    fn most_specific_level_wins() {
        let global = block(10, 120, 600);
        let vendor = block(7, 90, 400);
        let model = block(3, 30, 2);

        assert_eq!(resolve_effective_config(Some(&global), None, None), global.effective());
        assert_eq!(
            resolve_effective_config(Some(&global), Some(&vendor), None),
            vendor.effective()
        );
        assert_eq!(
            resolve_effective_config(Some(&global), Some(&vendor), Some(&model)),
            model.effective()
        );
    }

    #[test]
    fn partial_override_uses_default_not_broader_level() {
        // GIVEN: a global block with every field set and a model block
        // that only sets the threshold
        let global = block(10, 120, 600);
        let model = block(2, 0, 0);
        // WHEN: resolving
        let effective = resolve_effective_config(Some(&global), None, Some(&model));
        // THEN: missing fields come from the hard default, not from global
        assert_eq!(effective.failure_threshold, 2);
        assert_eq!(effective.time_window_seconds, DEFAULT_TIME_WINDOW_SECONDS);
        assert_eq!(effective.disable_duration_seconds, DEFAULT_DISABLE_DURATION_SECONDS);
    }

    #[test]
    fn empty_block_is_all_defaults() {
        let effective = resolve_effective_config(None, Some(&AutoDisableConfig::default()), None);
        assert_eq!(effective, EffectiveAutoDisableConfig::default());
    }

    #[test]
    fn resolution_is_repeatable() {
        let global = block(4, 0, 90);
        let first = resolve_effective_config(Some(&global), None, None);
        for _ in 0..10 {
            assert_eq!(resolve_effective_config(Some(&global), None, None), first);
        }
    }

    #[test]
    fn table_resolves_by_name_and_alias() {
        let yaml = r"
auto_disable: { failure_threshold: 9 }
vendors:
  - name: claude
    auto_disable: { failure_threshold: 4 }
    models:
      - name: claude-3-sonnet
        alias: sonnet
        auto_disable: { failure_threshold: 3, disable_duration_seconds: 2 }
      - name: claude-3-opus
  - name: openai
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let table = PolicyTable::from_config(&config);

        assert_eq!(table.resolve("claude", "claude-3-sonnet").failure_threshold, 3);
        assert_eq!(table.resolve("claude", "sonnet").disable_duration_seconds, 2);
        assert_eq!(table.resolve("claude", "claude-3-opus").failure_threshold, 4);
        assert_eq!(table.resolve("openai", "gpt-4").failure_threshold, 9);
        assert_eq!(table.resolve("unknown", "m").failure_threshold, 9);
    }

    #[test]
    fn builder_overrides() {
        let table = PolicyTable::with_global(None)
            .with_vendor("gemini", block(6, 0, 0))
            .with_model("gemini", "gemini-pro", block(2, 10, 5));
        assert_eq!(table.resolve("gemini", "gemini-pro").failure_threshold, 2);
        assert_eq!(table.resolve("gemini", "gemini-flash").failure_threshold, 6);
        assert_eq!(table.resolve("openai", "gpt-4"), EffectiveAutoDisableConfig::default());
    }

    #[test]
    fn oversized_durations_saturate() {
        let effective = block(1, u64::MAX, u64::MAX).effective();
        assert_eq!(effective.time_window(), TimeDelta::MAX);
        assert_eq!(effective.disable_duration(), TimeDelta::MAX);
    }
}
