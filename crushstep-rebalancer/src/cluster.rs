//! Cluster collaborators
//!
//! Traits for everything the rebalancer consumes from the cluster, plus
//! implementations on top of the `ceph`, `osdmaptool` and `crushtool`
//! command line tools.

use async_trait::async_trait;
use crushstep_core::{CrushStepError, HierarchicalPath, NodeId, Result, Topology};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::runner::{argv, CommandRunner};

// =============================================================================
// TRAITS FOR DEPENDENCY INJECTION
// =============================================================================

/// Source of the live CRUSH topology
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn osd_tree(&self) -> Result<Topology>;
}

/// Number of placement groups in one state
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PgStateCount {
    pub name: String,
    pub num: u64,
}

/// Source of placement-group health
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn pg_states(&self) -> Result<Vec<PgStateCount>>;
}

/// Applies a crush weight change cluster-side
#[async_trait]
pub trait WeightSink: Send + Sync {
    async fn set_weight(&self, name: &str, weight: f64, path: &HierarchicalPath) -> Result<()>;
}

/// Placement map snapshot plumbing used by the estimate
#[async_trait]
pub trait MapStore: Send + Sync {
    /// Write the current osdmap to `dest`
    async fn export_osdmap(&self, dest: &Path) -> Result<()>;

    /// Extract the crush map embedded in `osdmap` into `dest`
    async fn export_crush(&self, osdmap: &Path, dest: &Path) -> Result<()>;

    /// Rewrite one item's weight inside a crush map file
    async fn update_crush_item(
        &self,
        crush: &Path,
        id: NodeId,
        weight: f64,
        name: &str,
        path: &HierarchicalPath,
    ) -> Result<()>;

    /// Replace the crush map embedded in `osdmap`
    async fn import_crush(&self, crush: &Path, osdmap: &Path) -> Result<()>;
}

/// Predicted inbound data for one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NodeRemap {
    pub bytes_in: u64,
    pub pg_in: u64,
}

/// Compares two osdmap snapshots
#[async_trait]
pub trait PlacementDiff: Send + Sync {
    async fn diff(&self, before: &Path, after: &Path) -> Result<BTreeMap<NodeId, NodeRemap>>;
}

/// Render a weight the way crush commands accept it
pub fn format_weight(weight: f64) -> String {
    format!("{:.5}", weight)
}

// =============================================================================
// CEPH CLI IMPLEMENTATION
// =============================================================================

/// Cluster access through the ceph command line tools
#[derive(Debug, Clone)]
pub struct CephCluster<R> {
    runner: R,
    ceph: String,
}

#[derive(Deserialize)]
struct PgStat {
    #[serde(default)]
    num_pg_by_state: Option<Vec<PgStateCount>>,
    /// Newer releases nest the counters under `pg_summary`
    #[serde(default)]
    pg_summary: Option<PgSummary>,
}

#[derive(Deserialize)]
struct PgSummary {
    num_pg_by_state: Vec<PgStateCount>,
}

impl<R: CommandRunner> CephCluster<R> {
    pub fn new(runner: R) -> Self {
        Self::with_ceph_command(runner, "ceph")
    }

    pub fn with_ceph_command(runner: R, ceph: impl Into<String>) -> Self {
        Self {
            runner,
            ceph: ceph.into(),
        }
    }

    async fn ceph(&self, args: &[&str]) -> Result<String> {
        let mut cmd = vec![self.ceph.clone()];
        cmd.extend(args.iter().map(|a| a.to_string()));
        self.runner.run(&cmd).await
    }
}

#[async_trait]
impl<R: CommandRunner> TopologySource for CephCluster<R> {
    async fn osd_tree(&self) -> Result<Topology> {
        let json = self.ceph(&["osd", "tree", "--format=json"]).await?;
        Topology::from_json(&json)
    }
}

#[async_trait]
impl<R: CommandRunner> HealthSource for CephCluster<R> {
    async fn pg_states(&self) -> Result<Vec<PgStateCount>> {
        let json = self.ceph(&["pg", "stat", "--format=json"]).await?;
        let stat: PgStat = serde_json::from_str(&json)?;
        // An empty list reads as settled, so an unknown layout must not default to one
        stat.num_pg_by_state
            .or_else(|| stat.pg_summary.map(|s| s.num_pg_by_state))
            .ok_or_else(|| CrushStepError::ExternalCommand {
                command: format!("{} pg stat --format=json", self.ceph),
                status: "unrecognized output".to_string(),
                stderr: format!("no num_pg_by_state in {}", json.trim()),
            })
    }
}

#[async_trait]
impl<R: CommandRunner> WeightSink for CephCluster<R> {
    async fn set_weight(&self, name: &str, weight: f64, path: &HierarchicalPath) -> Result<()> {
        let weight = format_weight(weight);
        let mut args = vec!["osd", "crush", "set", name, weight.as_str()];
        let location = path.location_args();
        args.extend(location.iter().map(String::as_str));
        self.ceph(&args).await?;
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> MapStore for CephCluster<R> {
    async fn export_osdmap(&self, dest: &Path) -> Result<()> {
        let dest = dest.display().to_string();
        self.ceph(&["osd", "getmap", "-o", &dest]).await?;
        Ok(())
    }

    async fn export_crush(&self, osdmap: &Path, dest: &Path) -> Result<()> {
        let cmd = argv([
            "osdmaptool".to_string(),
            "--export-crush".to_string(),
            dest.display().to_string(),
            osdmap.display().to_string(),
        ]);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn update_crush_item(
        &self,
        crush: &Path,
        id: NodeId,
        weight: f64,
        name: &str,
        path: &HierarchicalPath,
    ) -> Result<()> {
        let crush = crush.display().to_string();
        let mut cmd = argv([
            "crushtool",
            "-i",
            crush.as_str(),
            "-o",
            crush.as_str(),
            "--update-item",
        ]);
        cmd.push(id.to_string());
        cmd.push(format_weight(weight));
        cmd.push(name.to_string());
        for (tp, bucket) in path.location() {
            cmd.push("--loc".to_string());
            cmd.push(tp.clone());
            cmd.push(bucket.clone());
        }
        self.runner.run(&cmd).await?;
        Ok(())
    }

    async fn import_crush(&self, crush: &Path, osdmap: &Path) -> Result<()> {
        let cmd = argv([
            "osdmaptool".to_string(),
            "--import-crush".to_string(),
            crush.display().to_string(),
            osdmap.display().to_string(),
        ]);
        self.runner.run(&cmd).await?;
        Ok(())
    }
}

// =============================================================================
// MAP DIFF TOOL
// =============================================================================

/// Delegates the placement diff to an external tool.
///
/// The tool receives the two osdmap paths as its last arguments and prints
/// `{"<osd id>": {"bytes_in": N, "pg_in": N}, ...}` on stdout.
#[derive(Debug, Clone)]
pub struct RemapTool<R> {
    runner: R,
    command: Vec<String>,
}

impl<R: CommandRunner> RemapTool<R> {
    pub fn new(runner: R, command: Vec<String>) -> Self {
        Self { runner, command }
    }
}

#[async_trait]
impl<R: CommandRunner> PlacementDiff for RemapTool<R> {
    async fn diff(&self, before: &Path, after: &Path) -> Result<BTreeMap<NodeId, NodeRemap>> {
        let mut cmd = self.command.clone();
        cmd.push(before.display().to_string());
        cmd.push(after.display().to_string());

        let json = self.runner.run(&cmd).await?;
        let changes: BTreeMap<NodeId, NodeRemap> = serde_json::from_str(&json)?;

        debug!(nodes = changes.len(), "Placement diff computed");
        Ok(changes)
    }
}
