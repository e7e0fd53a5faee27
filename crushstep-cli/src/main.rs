//! crushstep CLI
//!
//! Gradual CRUSH weight migration for Ceph clusters.
//!
//! # Commands
//! - `rebalance` - Step devices toward the weights listed in a YAML config
//!
//! # Environment
//! - `CRUSHSTEP_CEPH` - `ceph` binary to invoke
//! - `RUST_LOG` - log filter (defaults to warnings only)

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

use commands::rebalance::RebalanceArgs;

#[derive(Parser)]
#[command(name = "crushstep")]
#[command(about = "Gradual CRUSH weight migration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move devices to their configured weights in small steps
    Rebalance {
        /// Path to the YAML rebalance config
        config: PathBuf,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,

        /// Print the data movement estimate and exit
        #[arg(short, long)]
        estimate_only: bool,

        /// Skip the data movement estimate
        #[arg(short, long)]
        no_estimate: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rebalance {
            config,
            quiet,
            estimate_only,
            no_estimate,
        } => {
            commands::rebalance(RebalanceArgs {
                config,
                quiet,
                estimate_only,
                no_estimate,
            })
            .await
        }
    }
}
