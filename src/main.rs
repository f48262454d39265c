//! modelgate - failure tracking and auto-disable for multi-vendor AI routing

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use modelgate::{
    cli::{Cli, Command, OutputFormat},
    config::Config,
    failure::{AutoDisableTracker, FailureTracker, PairPolicy, describe_policies, policies_json},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Policies { format } => run_policies(&config, format),
        Command::Validate => run_validate(&config).await,
    }
}

/// Print the effective policy of every configured model
fn run_policies(config: &Config, format: OutputFormat) -> ExitCode {
    match format {
        OutputFormat::Json => match policies_json(config) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ {e}");
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Table => print_table(config, &describe_policies(config)),
    }

    ExitCode::SUCCESS
}

fn print_table(config: &Config, rows: &[PairPolicy]) {
    let global = config.auto_disable.map(|g| g.effective()).unwrap_or_default();
    println!(
        "Global policy: {} failures in {}s → disabled for {}s",
        global.failure_threshold, global.time_window_seconds, global.disable_duration_seconds
    );

    if rows.is_empty() {
        println!("\nNo vendors with models configured.");
        return;
    }

    let vendor_w = rows.iter().map(|r| r.vendor.len()).max().unwrap_or(0).max(6);
    let model_w = rows
        .iter()
        .map(|r| display_model(r).len())
        .max()
        .unwrap_or(0)
        .max(5);

    println!();
    println!(
        "{:<vendor_w$}  {:<model_w$}  {:<7}  {:>9}  {:>7}  {:>8}  SOURCE",
        "VENDOR", "MODEL", "ENABLED", "THRESHOLD", "WINDOW", "DISABLE"
    );
    for row in rows {
        println!(
            "{:<vendor_w$}  {:<model_w$}  {:<7}  {:>9}  {:>6}s  {:>7}s  {}",
            row.vendor,
            display_model(row),
            if row.enabled { "yes" } else { "no" },
            row.policy.failure_threshold,
            row.policy.time_window_seconds,
            row.policy.disable_duration_seconds,
            row.source,
        );
    }
}

fn display_model(row: &PairPolicy) -> String {
    match &row.alias {
        Some(alias) => format!("{} ({alias})", row.model),
        None => row.model.clone(),
    }
}

/// Validate configuration and start/stop a tracker built from it
async fn run_validate(config: &Config) -> ExitCode {
    let tracker = AutoDisableTracker::from_config(config);
    let models: usize = config.vendors.iter().map(|v| v.models.len()).sum();
    info!(vendors = config.vendors.len(), models, "Configuration loaded");
    tracker.close().await;

    println!(
        "✅ Configuration valid: {} vendor(s), {} model(s), sweep every {:?}, stale window: {:?}",
        config.vendors.len(),
        models,
        config.tracker.check_interval,
        config.tracker.stale_window,
    );
    ExitCode::SUCCESS
}
