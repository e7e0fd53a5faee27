//! Rebalance Command
//!
//! Gradually moves the configured devices to their desired crush weights.

use anyhow::{Context, Result};
use console::style;
use crushstep_rebalancer::{
    CephCluster, EstimateMode, ProcessRunner, RebalanceConfig, RebalanceSession, RemapTool,
    RunOptions, SessionOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

// Plain markers on consoles without unicode glyphs
#[cfg(windows)]
const DONE: &str = "[OK]";
#[cfg(not(windows))]
const DONE: &str = "\u{2713}";

#[cfg(windows)]
const FAILED: &str = "[X]";
#[cfg(not(windows))]
const FAILED: &str = "\u{2717}";

/// Rebalance configuration
pub struct RebalanceArgs {
    pub config: PathBuf,
    pub quiet: bool,
    pub estimate_only: bool,
    pub no_estimate: bool,
}

/// Run rebalance command
pub async fn run(args: RebalanceArgs) -> Result<ExitCode> {
    // Incompatible flags are rejected before the cluster is contacted
    let estimate = match EstimateMode::from_flags(args.estimate_only, args.no_estimate) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{} {}", style(FAILED).red(), e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = RebalanceConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    info!(
        config = %args.config.display(),
        osds = config.osds.len(),
        ceph = %config.ceph_command,
        "Starting rebalance"
    );

    let cluster = CephCluster::with_ceph_command(ProcessRunner, config.ceph_command.clone());
    let diff = RemapTool::new(ProcessRunner, config.remap_command.clone());
    let options = RunOptions {
        quiet: args.quiet,
        estimate,
    };

    let outcome = RebalanceSession::new(config, &cluster, &diff, options)
        .run()
        .await
        .context("Rebalance failed")?;

    if let SessionOutcome::Rebalanced { stats, .. } = &outcome {
        if !args.quiet {
            println!(
                "{} All targets reached their desired weights ({} rounds)",
                style(DONE).green(),
                stats.rounds
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}
