//! modelgate library
//!
//! Per-(vendor, model) failure tracking and auto-disable for a multi-vendor
//! AI API proxy.
//!
//! # Features
//!
//! - **Auto-disable**: a pair that fails `failure_threshold` times within
//!   `time_window_seconds` is excluded from routing for
//!   `disable_duration_seconds`
//! - **Three-level policy**: model > vendor > global > hard default
//! - **Self-healing**: a background sweep re-enables expired pairs
//! - **Routing gate**: combines static enable flags with auto-disable state
//! - **Executor hook**: outcome reporting for unary calls and streams
//! - **Management**: list, inspect and manually re-enable disabled pairs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod failure;
pub mod management;
pub mod routing;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns `Error::Config` if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
