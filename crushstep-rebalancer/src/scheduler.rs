//! Rebalance Scheduler
//!
//! Moves every target's crush weight toward its desired value in bounded
//! steps:
//! - at most `max_reweight` nodes are touched per round
//! - each node moves at most `step` per round, never past its target
//! - the cluster must settle before the next round starts
//!
//! Targets are served round-robin so nodes needing many steps cannot starve
//! the rest of the queue.

use crushstep_core::{Result, Topology};
use std::collections::VecDeque;
use tracing::{debug, info, instrument};

use crate::cluster::{format_weight, HealthSource, WeightSink};
use crate::config::SelectionPolicy;
use crate::console::Console;
use crate::monitor::{CompletionMonitor, WaitOutcome};
use crate::target::{total_weight_change, RebalanceTarget};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Max absolute weight change per node per round
    pub step: f64,
    /// Max nodes advanced per round
    pub max_reweight: usize,
    /// Convergence tolerance
    pub min_weight_diff: f64,
    pub selection: SelectionPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            step: 0.5,
            max_reweight: 4,
            min_weight_diff: 0.01,
            selection: SelectionPolicy::RoundRobin,
        }
    }
}

/// What one round does to one target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightStep {
    /// Weight committed after this round
    pub new_weight: f64,
    /// Signed change applied this round
    pub change: f64,
    /// Whether the change is large enough to send to the cluster
    pub issue_command: bool,
    /// Whether the target is done after this round
    pub converged: bool,
}

/// Compute one round's move from `current` toward `desired`.
///
/// Within `step` of the target the node lands exactly on it; otherwise it
/// moves by exactly `step` in the target's direction.
pub fn plan_step(current: f64, desired: f64, step: f64, min_weight_diff: f64) -> WeightStep {
    let delta = desired - current;
    let (new_weight, change) = if delta.abs() <= step {
        (desired, delta)
    } else {
        let change = step.copysign(delta);
        (current + change, change)
    };

    WeightStep {
        new_weight,
        change,
        issue_command: change.abs() > min_weight_diff,
        converged: (new_weight - desired).abs() < min_weight_diff,
    }
}

/// Whole percent of `total` covered by `applied`, rounded down
pub fn progress_percent(applied: f64, total: f64) -> u32 {
    (applied * 100.0 / total).floor() as u32
}

/// Statistics of a completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceStats {
    /// Rounds executed
    pub rounds: usize,
    /// Weight-update commands sent to the cluster
    pub commands_issued: usize,
    /// Waits that actually slept for the cluster
    pub settle_waits: usize,
    /// Sum of absolute applied changes
    pub weight_changed: f64,
}

impl RebalanceStats {
    fn record_wait(&mut self, outcome: WaitOutcome) {
        if !outcome.is_immediate() {
            self.settle_waits += 1;
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rounds, {} weight updates, {} settle waits, total change {:.3}",
            self.rounds, self.commands_issued, self.settle_waits, self.weight_changed
        )
    }
}

/// Result of [`Scheduler::run`]
#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceOutcome {
    /// Every target was already within tolerance; the cluster was not touched
    NothingToChange,
    /// All targets converged
    Completed(RebalanceStats),
}

/// Drives target weights to their desired values
pub struct Scheduler<'a, W: ?Sized, H: ?Sized> {
    config: SchedulerConfig,
    sink: &'a W,
    monitor: &'a CompletionMonitor<'a, H>,
    console: Console,
}

impl<'a, W, H> Scheduler<'a, W, H>
where
    W: WeightSink + ?Sized,
    H: HealthSource + ?Sized,
{
    pub fn new(
        config: SchedulerConfig,
        sink: &'a W,
        monitor: &'a CompletionMonitor<'a, H>,
        console: Console,
    ) -> Self {
        Self {
            config,
            sink,
            monitor,
            console,
        }
    }

    /// Run until every target has converged.
    ///
    /// Weights are tracked in `topology`, which must not be modified by
    /// anyone else while the run is in progress. A failed weight update
    /// aborts the run; changes already applied stay in place.
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run(
        &self,
        topology: &mut Topology,
        targets: Vec<RebalanceTarget>,
    ) -> Result<RebalanceOutcome> {
        let min_diff = self.config.min_weight_diff;
        let total_change = total_weight_change(topology, &targets)?;
        if total_change < min_diff {
            info!("All targets already within tolerance");
            return Ok(RebalanceOutcome::NothingToChange);
        }

        let mut queue = VecDeque::with_capacity(targets.len());
        for target in targets {
            if target.is_converged(topology, min_diff)? {
                debug!(path = %target.path, "Target already converged");
            } else {
                queue.push_back(target);
            }
        }

        let mut stats = RebalanceStats::default();
        let mut had_updates = false;

        while !queue.is_empty() {
            stats.record_wait(self.monitor.wait_until_settled(had_updates).await?);

            if stats.weight_changed > min_diff {
                self.console.info(format!(
                    "Done {}%",
                    progress_percent(stats.weight_changed, total_change)
                ));
            }

            let batch = self.next_batch(&mut queue);
            had_updates = false;

            for target in &batch {
                let node = topology.node(target.node);
                let current = target.current_weight(topology)?;
                let step = plan_step(current, target.desired_weight, self.config.step, min_diff);

                if step.issue_command {
                    self.console.command(format!(
                        "ceph osd crush set {} {} {}",
                        node.name,
                        format_weight(step.new_weight),
                        target.path.location_args().join(" ")
                    ));
                    self.sink
                        .set_weight(&node.name, step.new_weight, &target.path)
                        .await?;
                    stats.commands_issued += 1;
                    had_updates = true;
                }

                if step.converged {
                    debug!(path = %target.path, "Target converged");
                    queue.retain(|queued| queued.node != target.node);
                }

                topology.node_mut(target.node).weight = Some(step.new_weight);
                stats.weight_changed += step.change.abs();
            }

            stats.rounds += 1;
            debug!(
                round = stats.rounds,
                remaining = queue.len(),
                had_updates,
                "Round complete"
            );
        }

        stats.record_wait(self.monitor.wait_until_settled(had_updates).await?);

        info!(summary = %stats.summary(), "Rebalance complete");
        Ok(RebalanceOutcome::Completed(stats))
    }

    /// Take the next batch off the queue according to the selection policy
    fn next_batch(&self, queue: &mut VecDeque<RebalanceTarget>) -> Vec<RebalanceTarget> {
        let take = self.config.max_reweight.min(queue.len());
        match self.config.selection {
            SelectionPolicy::RoundRobin => {
                let batch: Vec<_> = queue.drain(..take).collect();
                queue.extend(batch.iter().cloned());
                batch
            }
        }
    }
}
