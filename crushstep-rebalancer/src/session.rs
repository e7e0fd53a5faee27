//! Rebalance session
//!
//! One operator invocation: load the live topology, resolve every target,
//! optionally estimate the data movement, then step weights until done.
//! Every target is resolved before the cluster is touched.

use crushstep_core::{CrushStepError, Result};
use tracing::{info, warn};

use crate::cluster::{HealthSource, MapStore, PlacementDiff, TopologySource, WeightSink};
use crate::config::RebalanceConfig;
use crate::console::Console;
use crate::estimator::{estimate, RebalanceEstimate};
use crate::monitor::CompletionMonitor;
use crate::scheduler::{RebalanceOutcome, RebalanceStats, Scheduler};
use crate::target::{resolve_targets, total_weight_change};

/// Whether the data-movement estimate runs, and whether anything runs after it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimateMode {
    Skip,
    #[default]
    Estimate,
    /// Print the estimate and leave weights untouched
    EstimateOnly,
}

impl EstimateMode {
    /// Map the `--estimate-only` / `--no-estimate` flags; both at once is invalid
    pub fn from_flags(estimate_only: bool, no_estimate: bool) -> Result<Self> {
        match (estimate_only, no_estimate) {
            (true, true) => Err(CrushStepError::ConfigValidation(
                "--estimate-only and --no-estimate are mutually exclusive".to_string(),
            )),
            (true, false) => Ok(EstimateMode::EstimateOnly),
            (false, true) => Ok(EstimateMode::Skip),
            (false, false) => Ok(EstimateMode::Estimate),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub quiet: bool,
    pub estimate: EstimateMode,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Every target was already within tolerance
    NothingToChange,
    /// Estimate-only run
    Estimated(RebalanceEstimate),
    Rebalanced {
        estimate: Option<RebalanceEstimate>,
        stats: RebalanceStats,
    },
}

/// Drives a full rebalance against one cluster
pub struct RebalanceSession<'a, C: ?Sized, D: ?Sized> {
    config: RebalanceConfig,
    cluster: &'a C,
    diff: &'a D,
    options: RunOptions,
    console: Console,
}

impl<'a, C, D> RebalanceSession<'a, C, D>
where
    C: TopologySource + HealthSource + WeightSink + MapStore + ?Sized,
    D: PlacementDiff + ?Sized,
{
    pub fn new(config: RebalanceConfig, cluster: &'a C, diff: &'a D, options: RunOptions) -> Self {
        Self {
            config,
            cluster,
            diff,
            options,
            console: Console::new(options.quiet),
        }
    }

    pub async fn run(&self) -> Result<SessionOutcome> {
        self.config.validate()?;

        let mut topology = self.cluster.osd_tree().await?;
        let targets = resolve_targets(&topology, &self.config.osds)?;

        info!(
            nodes = topology.len(),
            targets = targets.len(),
            "Resolved rebalance targets"
        );

        for target in &targets {
            self.console.info(format!(
                "{} => {}",
                topology.node(target.node),
                target.desired_weight
            ));
        }

        let total_change = total_weight_change(&topology, &targets)?;
        if total_change < self.config.min_weight_diff {
            self.console.info("Nothing to change");
            return Ok(SessionOutcome::NothingToChange);
        }
        self.console
            .info(format!("Total sum of all weight changes {:.1}", total_change));

        let estimate = match self.options.estimate {
            EstimateMode::Skip => None,
            EstimateMode::Estimate | EstimateMode::EstimateOnly => {
                let est = estimate(self.cluster, self.diff, &topology, &targets).await?;
                est.report(&self.console);
                Some(est)
            }
        };

        if self.options.estimate == EstimateMode::EstimateOnly {
            return Ok(match estimate {
                Some(est) => SessionOutcome::Estimated(est),
                None => SessionOutcome::NothingToChange,
            });
        }

        let monitor = CompletionMonitor::new(
            self.cluster,
            self.config.monitor_config(),
            self.console.clone(),
        );
        let scheduler = Scheduler::new(
            self.config.scheduler_config(),
            self.cluster,
            &monitor,
            self.console.clone(),
        );

        match scheduler.run(&mut topology, targets).await? {
            RebalanceOutcome::Completed(stats) => {
                self.console.info(format!("Rebalance finished: {}", stats.summary()));
                Ok(SessionOutcome::Rebalanced { estimate, stats })
            }
            RebalanceOutcome::NothingToChange => {
                warn!("Scheduler found nothing to change after a non-zero aggregate delta");
                Ok(SessionOutcome::NothingToChange)
            }
        }
    }
}
