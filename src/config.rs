//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::executor::VendorAliases;
use crate::failure::EffectiveAutoDisableConfig;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Global auto-disable settings (lowest precedence level)
    pub auto_disable: Option<AutoDisableConfig>,
    /// Failure tracker runtime settings
    pub tracker: TrackerConfig,
    /// Extra provider aliases, merged over the built-in alias table
    pub vendor_aliases: HashMap<String, String>,
    /// Upstream vendors
    pub vendors: Vec<VendorConfig>,
}

/// Auto-disable thresholds as written in configuration.
///
/// A zero field means "unset" and is filled from the hard default when the
/// block is resolved; it never falls through to a broader level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AutoDisableConfig {
    /// Failures within the window that trigger a disable
    pub failure_threshold: u32,
    /// Length of the counting window in seconds
    pub time_window_seconds: u64,
    /// How long a pair stays disabled, in seconds
    pub disable_duration_seconds: u64,
}

impl AutoDisableConfig {
    /// Fill unset fields of this block from the hard default.
    #[must_use]
    pub fn effective(&self) -> EffectiveAutoDisableConfig {
        let default = EffectiveAutoDisableConfig::default();
        EffectiveAutoDisableConfig {
            failure_threshold: if self.failure_threshold == 0 {
                default.failure_threshold
            } else {
                self.failure_threshold
            },
            time_window_seconds: if self.time_window_seconds == 0 {
                default.time_window_seconds
            } else {
                self.time_window_seconds
            },
            disable_duration_seconds: if self.disable_duration_seconds == 0 {
                default.disable_duration_seconds
            } else {
                self.disable_duration_seconds
            },
        }
    }
}

/// What `track_failure` does when a failure arrives after the counting
/// window has elapsed without the threshold being reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StaleWindowPolicy {
    /// Start a new window at the late failure (count restarts at 1)
    #[default]
    Restart,
    /// Keep counting against the stale window start
    Accumulate,
}

/// Failure tracker runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Interval of the auto-reenable sweep
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Stale counting window handling
    pub stale_window: StaleWindowPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            stale_window: StaleWindowPolicy::Restart,
        }
    }
}

/// Upstream vendor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VendorConfig {
    /// Canonical vendor name (the key the failure tracker uses)
    pub name: String,
    /// Static enable flag; `None` means enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Vendor-level auto-disable settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_disable: Option<AutoDisableConfig>,
    /// Models offered by this vendor
    pub models: Vec<ModelConfig>,
}

impl VendorConfig {
    /// Whether the vendor is statically enabled (`None` defaults to true)
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Find a model by name or alias
    #[must_use]
    pub fn model(&self, model: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.matches(model))
    }
}

/// Model configuration under a vendor
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelConfig {
    /// Upstream model name
    pub name: String,
    /// Client-facing alias
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Static enable flag; `None` inherits the vendor flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Model-level auto-disable settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_disable: Option<AutoDisableConfig>,
}

impl ModelConfig {
    /// Whether `model` names this entry (by name or alias)
    #[must_use]
    pub fn matches(&self, model: &str) -> bool {
        self.name == model || self.alias.as_deref() == Some(model)
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MODELGATE_ prefix)
        figment = figment.merge(Env::prefixed("MODELGATE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Reject configurations the tracker cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.check_interval.is_zero() {
            return Err(Error::Config(
                "tracker.check_interval must be greater than zero".to_string(),
            ));
        }

        let aliases = VendorAliases::from_config(self);
        let mut seen = std::collections::HashSet::new();
        for vendor in &self.vendors {
            if vendor.name.trim().is_empty() {
                return Err(Error::Config("vendor with empty name".to_string()));
            }
            if vendor.name.contains(':') {
                return Err(Error::Config(format!(
                    "vendor '{}' must not contain ':'",
                    vendor.name
                )));
            }
            let canonical = aliases.normalize(&vendor.name);
            if canonical != vendor.name {
                return Err(Error::Config(format!(
                    "vendor '{}' is an alias of '{canonical}'; name it '{canonical}'",
                    vendor.name
                )));
            }
            if !seen.insert(vendor.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate vendor '{}'",
                    vendor.name
                )));
            }
            if let Some(model) = vendor.models.iter().find(|m| m.name.trim().is_empty()) {
                return Err(Error::Config(format!(
                    "vendor '{}' has a model with empty name (alias: {:?})",
                    vendor.name, model.alias
                )));
            }
        }

        Ok(())
    }

    /// Find a vendor by canonical name
    #[must_use]
    pub fn vendor(&self, name: &str) -> Option<&VendorConfig> {
        self.vendors.iter().find(|v| v.name == name)
    }

    /// Upstream model name for a requested name or alias.
    ///
    /// The first model in file order whose name or alias matches wins;
    /// unknown names map to themselves.
    #[must_use]
    pub fn upstream_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.vendors
            .iter()
            .flat_map(|v| &v.models)
            .find(|m| m.matches(model))
            .map_or(model, |m| m.name.as_str())
    }

    /// The static enable flag for a pair, if configuration has an opinion.
    ///
    /// A vendor switched off disables all of its models regardless of their
    /// own flags. Otherwise the model flag wins over the vendor flag.
    #[must_use]
    pub fn explicit_enabled(&self, vendor: &str, model: &str) -> Option<bool> {
        let vendor_cfg = self.vendor(vendor)?;
        if vendor_cfg.enabled == Some(false) {
            return Some(false);
        }
        vendor_cfg
            .model(model)
            .and_then(|m| m.enabled)
            .or(vendor_cfg.enabled)
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 && duration.as_secs() == 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "100ms", "30s", "5m", "1h" or a bare number of seconds.
    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |n: &str| n.trim().parse::<u64>().map_err(|e| format!("invalid duration '{s}': {e}"));
        let scaled = |n: &str, factor: u64| {
            number(n)?
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration '{s}' is too large"))
        };
        // "ms" must be tried before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, 3600)
        } else {
            number(s).map(Duration::from_secs)
        }
    }
}
