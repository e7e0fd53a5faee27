//! Rebalance targets
//!
//! Resolves every configured `osds` entry against the live topology before
//! anything is changed: a single unresolvable entry aborts the whole run.

use crushstep_core::{CrushStepError, HierarchicalPath, NodeIndex, Result, Topology};
use std::collections::HashSet;
use tracing::debug;

use crate::config::OsdTarget;

/// A topology node, where it lives, and the weight it should end up with
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceTarget {
    pub node: NodeIndex,
    pub path: HierarchicalPath,
    pub desired_weight: f64,
}

impl RebalanceTarget {
    /// Weight the scheduler currently believes the node has
    pub fn current_weight(&self, topology: &Topology) -> Result<f64> {
        topology
            .node(self.node)
            .weight
            .ok_or_else(|| CrushStepError::UnweightedNode {
                path: self.path.to_string(),
            })
    }

    /// Signed distance still to travel
    pub fn remaining(&self, topology: &Topology) -> Result<f64> {
        Ok(self.desired_weight - self.current_weight(topology)?)
    }

    pub fn is_converged(&self, topology: &Topology, min_weight_diff: f64) -> Result<bool> {
        Ok(self.remaining(topology)?.abs() < min_weight_diff)
    }
}

/// Resolve config entries to topology nodes, in config order
pub fn resolve_targets(topology: &Topology, osds: &[OsdTarget]) -> Result<Vec<RebalanceTarget>> {
    let mut seen = HashSet::with_capacity(osds.len());
    let mut targets = Vec::with_capacity(osds.len());

    for osd in osds {
        let path = osd.path()?;
        let node = topology.resolve(&path)?;

        if topology.node(node).weight.is_none() {
            return Err(CrushStepError::UnweightedNode {
                path: path.to_string(),
            });
        }
        if !seen.insert(node) {
            return Err(CrushStepError::ConfigValidation(format!(
                "{} is listed more than once",
                path
            )));
        }

        debug!(path = %path, desired = osd.weight, "Resolved rebalance target");

        targets.push(RebalanceTarget {
            node,
            path,
            desired_weight: osd.weight,
        });
    }

    Ok(targets)
}

/// Sum of absolute weight changes still required across all targets
pub fn total_weight_change(topology: &Topology, targets: &[RebalanceTarget]) -> Result<f64> {
    targets
        .iter()
        .map(|t| t.remaining(topology).map(f64::abs))
        .sum()
}
