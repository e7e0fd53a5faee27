//! Estimation Step
//!
//! Dry-run impact of a migration: applies every target's final weight to a
//! copy of the current placement map and asks a diff tool how much data
//! would land on each node. The estimate describes the end state only, not
//! the gradual path, and never changes what the scheduler does.

use crushstep_core::{format_bytes, NodeId, Result, Topology};
use std::collections::BTreeMap;
use tempfile::TempDir;
use tracing::{debug, info, instrument};

use crate::cluster::{MapStore, NodeRemap, PlacementDiff};
use crate::console::Console;
use crate::target::RebalanceTarget;

/// Predicted data movement for reaching every desired weight at once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceEstimate {
    pub per_node: BTreeMap<NodeId, NodeRemap>,
    pub total_bytes_in: u64,
    pub total_pg_in: u64,
}

impl RebalanceEstimate {
    pub fn from_changes(per_node: BTreeMap<NodeId, NodeRemap>) -> Self {
        let total_bytes_in = per_node.values().map(|c| c.bytes_in).sum();
        let total_pg_in = per_node.values().map(|c| c.pg_in).sum();
        Self {
            per_node,
            total_bytes_in,
            total_pg_in,
        }
    }

    /// Print totals; shown even in quiet mode
    pub fn report(&self, console: &Console) {
        console.always(format!(
            "Total bytes to be moved : {}",
            format_bytes(self.total_bytes_in)
        ));
        console.always(format!("Total PG to be moved  : {}", self.total_pg_in));
    }
}

/// Compute the end-state estimate for `targets`.
///
/// Map snapshots are written to a temporary directory removed on return.
#[instrument(skip_all, fields(targets = targets.len()))]
pub async fn estimate<M, D>(
    maps: &M,
    diff: &D,
    topology: &Topology,
    targets: &[RebalanceTarget],
) -> Result<RebalanceEstimate>
where
    M: MapStore + ?Sized,
    D: PlacementDiff + ?Sized,
{
    let workdir = TempDir::new()?;
    let osdmap = workdir.path().join("osdmap");
    let crushmap = workdir.path().join("crushmap");
    let osdmap_new = workdir.path().join("osdmap.new");

    maps.export_osdmap(&osdmap).await?;
    maps.export_crush(&osdmap, &crushmap).await?;

    for target in targets {
        let node = topology.node(target.node);
        maps.update_crush_item(
            &crushmap,
            node.id,
            target.desired_weight,
            &node.name,
            &target.path,
        )
        .await?;
    }

    tokio::fs::copy(&osdmap, &osdmap_new).await?;
    maps.import_crush(&crushmap, &osdmap_new).await?;

    let changes = diff.diff(&osdmap, &osdmap_new).await?;
    for (id, remap) in &changes {
        if let Some(index) = topology.get(*id) {
            debug!(
                node = %topology.node(index).name,
                bytes_in = remap.bytes_in,
                pg_in = remap.pg_in,
                "Predicted inbound data"
            );
        }
    }
    let estimate = RebalanceEstimate::from_changes(changes);

    info!(
        bytes_in = estimate.total_bytes_in,
        pg_in = estimate.total_pg_in,
        "Rebalance estimate computed"
    );

    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crushstep_core::{HierarchicalPath, NodeRecord};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Writes placeholder map files and records crush item updates
    #[derive(Default)]
    struct FileMaps {
        updates: Mutex<Vec<(NodeId, f64, String)>>,
        imported_into: Mutex<Option<PathBuf>>,
    }

    #[async_trait]
    impl MapStore for FileMaps {
        async fn export_osdmap(&self, dest: &Path) -> Result<()> {
            tokio::fs::write(dest, b"osdmap-v1").await?;
            Ok(())
        }

        async fn export_crush(&self, _osdmap: &Path, dest: &Path) -> Result<()> {
            tokio::fs::write(dest, b"crush").await?;
            Ok(())
        }

        async fn update_crush_item(
            &self,
            _crush: &Path,
            id: NodeId,
            weight: f64,
            name: &str,
            _path: &HierarchicalPath,
        ) -> Result<()> {
            self.updates
                .lock()
                .unwrap()
                .push((id, weight, name.to_string()));
            Ok(())
        }

        async fn import_crush(&self, _crush: &Path, osdmap: &Path) -> Result<()> {
            *self.imported_into.lock().unwrap() = Some(osdmap.to_path_buf());
            Ok(())
        }
    }

    struct FixedDiff;

    #[async_trait]
    impl PlacementDiff for FixedDiff {
        async fn diff(&self, before: &Path, after: &Path) -> Result<BTreeMap<NodeId, NodeRemap>> {
            // the hypothetical map starts as a copy of the current one
            assert_eq!(tokio::fs::read(before).await?, tokio::fs::read(after).await?);
            Ok(BTreeMap::from([
                (0, NodeRemap { bytes_in: 3 * 1024 * 1024, pg_in: 3 }),
                (1, NodeRemap { bytes_in: 1024 * 1024, pg_in: 1 }),
            ]))
        }
    }

    fn single_osd() -> (Topology, Vec<RebalanceTarget>) {
        let topology = Topology::build(vec![
            NodeRecord {
                id: -1,
                name: "default".to_string(),
                node_type: "root".to_string(),
                crush_weight: None,
                children: vec![0],
            },
            NodeRecord {
                id: 0,
                name: "osd.0".to_string(),
                node_type: "osd".to_string(),
                crush_weight: Some(0.5),
                children: vec![],
            },
        ])
        .unwrap();
        let path = HierarchicalPath::from_iter([("root", "default"), ("osd", "osd.0")]);
        let targets = vec![RebalanceTarget {
            node: topology.resolve(&path).unwrap(),
            path,
            desired_weight: 0.2,
        }];
        (topology, targets)
    }

    #[tokio::test]
    async fn test_estimate_applies_final_weights_and_sums() {
        let (topology, targets) = single_osd();
        let maps = FileMaps::default();

        let estimate = estimate(&maps, &FixedDiff, &topology, &targets).await.unwrap();

        assert_eq!(estimate.total_bytes_in, 4 * 1024 * 1024);
        assert_eq!(estimate.total_pg_in, 4);
        assert_eq!(
            *maps.updates.lock().unwrap(),
            vec![(0, 0.2, "osd.0".to_string())]
        );
        let imported = maps.imported_into.lock().unwrap().clone().unwrap();
        assert!(imported.ends_with("osdmap.new"));
        // scratch files are gone once the estimate returns
        assert!(!imported.exists());
    }

    #[tokio::test]
    async fn test_estimate_leaves_topology_untouched() {
        let (topology, targets) = single_osd();
        estimate(&FileMaps::default(), &FixedDiff, &topology, &targets)
            .await
            .unwrap();
        assert_eq!(topology.node(targets[0].node).weight, Some(0.5));
    }

    #[test]
    fn test_from_changes_empty() {
        let estimate = RebalanceEstimate::from_changes(BTreeMap::new());
        assert_eq!(estimate.total_bytes_in, 0);
        assert_eq!(estimate.total_pg_in, 0);
    }
}
