//! CRUSH topology model
//!
//! Builds a navigable forest from the flat node list reported by
//! `ceph osd tree --format=json` and resolves hierarchical
//! `(type, name)` paths against it.
//!
//! Nodes live in an arena addressed by [`NodeIndex`]; parents own their
//! children by index, so rebalance targets can hold plain indices while the
//! scheduler mutates weights through `&mut Topology`.

use crate::error::{CrushStepError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// CRUSH item id as reported by the cluster (negative for buckets)
pub type NodeId = i64;

/// Slot of a node inside the topology arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

/// One entry of the `nodes` array in `ceph osd tree --format=json`
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub crush_weight: Option<f64>,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

/// Top-level shape of `ceph osd tree --format=json`
#[derive(Debug, Clone, Deserialize)]
pub struct OsdTree {
    pub nodes: Vec<NodeRecord>,
}

/// A bucket or device in the CRUSH hierarchy
#[derive(Debug, Clone)]
pub struct TopologyNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: String,
    /// Crush weight; only devices carry one
    pub weight: Option<f64>,
    pub children: Vec<NodeIndex>,
}

impl TopologyNode {
    fn matches(&self, node_type: &str, name: &str) -> bool {
        self.node_type == node_type && self.name == name
    }
}

impl fmt::Display for TopologyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.weight {
            Some(w) => write!(
                f,
                "{}(name={:?}, weight={}, id={})",
                self.node_type, self.name, w, self.id
            ),
            None => write!(
                f,
                "{}(name={:?}, weight=None, id={})",
                self.node_type, self.name, self.id
            ),
        }
    }
}

/// Ordered `(type, name)` segments from the coarsest level down to one node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HierarchicalPath {
    segments: Vec<(String, String)>,
}

impl HierarchicalPath {
    pub fn new(segments: Vec<(String, String)>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[(String, String)] {
        &self.segments
    }

    /// Every segment except the last one: where the node sits in the tree
    pub fn location(&self) -> &[(String, String)] {
        match self.segments.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// `type=name` pairs of [`Self::location`], as `ceph osd crush set` expects them
    pub fn location_args(&self) -> Vec<String> {
        self.location()
            .iter()
            .map(|(tp, name)| format!("{}={}", tp, name))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, S)> for HierarchicalPath {
    fn from_iter<I: IntoIterator<Item = (S, S)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(tp, name)| (tp.into(), name.into()))
                .collect(),
        )
    }
}

impl fmt::Display for HierarchicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|(tp, name)| format!("{}={}", tp, name))
            .collect();
        write!(f, "[{}]", parts.join(" "))
    }
}

/// In-memory CRUSH forest
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<TopologyNode>,
    by_id: HashMap<NodeId, NodeIndex>,
    roots: Vec<NodeIndex>,
}

impl Topology {
    /// Parse `ceph osd tree --format=json` output
    pub fn from_json(json: &str) -> Result<Self> {
        let tree: OsdTree = serde_json::from_str(json)?;
        Self::build(tree.nodes)
    }

    /// Build the forest from flat records.
    ///
    /// Children may be listed before their parents, so all ids are
    /// registered first and links are made in a second pass.
    pub fn build(records: Vec<NodeRecord>) -> Result<Self> {
        let mut nodes = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());
        let mut child_ids = Vec::with_capacity(records.len());

        for record in records {
            let index = NodeIndex(nodes.len());
            if by_id.insert(record.id, index).is_some() {
                return Err(CrushStepError::MalformedTopology(format!(
                    "duplicate node id {}",
                    record.id
                )));
            }
            child_ids.push(record.children);
            nodes.push(TopologyNode {
                id: record.id,
                name: record.name,
                node_type: record.node_type,
                weight: record.crush_weight,
                children: Vec::new(),
            });
        }

        let mut parent_of: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        for (slot, ids) in child_ids.into_iter().enumerate() {
            let parent = NodeIndex(slot);
            let mut children = Vec::with_capacity(ids.len());
            for child_id in ids {
                let child = *by_id.get(&child_id).ok_or_else(|| {
                    CrushStepError::MalformedTopology(format!(
                        "node {} references unknown child id {}",
                        nodes[slot].id, child_id
                    ))
                })?;
                if let Some(previous) = parent_of.insert(child, parent) {
                    return Err(CrushStepError::MalformedTopology(format!(
                        "node {} is a child of both {} and {}",
                        child_id, nodes[previous.0].id, nodes[slot].id
                    )));
                }
                children.push(child);
            }
            nodes[slot].children = children;
        }

        let roots: Vec<NodeIndex> = (0..nodes.len())
            .map(NodeIndex)
            .filter(|idx| !parent_of.contains_key(idx))
            .collect();

        let topology = Self {
            nodes,
            by_id,
            roots,
        };
        topology.check_reachable()?;

        debug!(
            nodes = topology.nodes.len(),
            roots = topology.roots.len(),
            "Topology built"
        );

        Ok(topology)
    }

    /// With at most one parent per node, anything not reachable from a root sits on a cycle
    fn check_reachable(&self) -> Result<()> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = self.roots.clone();
        while let Some(idx) = stack.pop() {
            if std::mem::replace(&mut seen[idx.0], true) {
                continue;
            }
            stack.extend(self.nodes[idx.0].children.iter().copied());
        }

        match seen.iter().position(|s| !s) {
            Some(slot) => Err(CrushStepError::MalformedTopology(format!(
                "node {} is part of a cycle",
                self.nodes[slot].id
            ))),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    pub fn node(&self, index: NodeIndex) -> &TopologyNode {
        &self.nodes[index.0]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut TopologyNode {
        &mut self.nodes[index.0]
    }

    /// Look up a node by its CRUSH id
    pub fn get(&self, id: NodeId) -> Option<NodeIndex> {
        self.by_id.get(&id).copied()
    }

    /// All nodes matching `path`.
    ///
    /// Every segment but the last narrows the candidate set and expands it to
    /// the children of all matches; the last segment only filters.
    pub fn find_nodes(&self, path: &HierarchicalPath) -> Vec<NodeIndex> {
        let Some(((last_type, last_name), prefix)) = path.segments().split_last() else {
            return self.roots.clone();
        };

        let mut candidates = self.roots.clone();
        for (tp, name) in prefix {
            candidates = candidates
                .into_iter()
                .filter(|idx| self.node(*idx).matches(tp, name))
                .flat_map(|idx| self.node(idx).children.iter().copied())
                .collect();
        }

        candidates
            .into_iter()
            .filter(|idx| self.node(*idx).matches(last_type, last_name))
            .collect()
    }

    /// Resolve `path` to exactly one node
    pub fn resolve(&self, path: &HierarchicalPath) -> Result<NodeIndex> {
        let found = self.find_nodes(path);
        match found.as_slice() {
            [single] => Ok(*single),
            [] => Err(CrushStepError::NodeNotFound {
                path: path.to_string(),
            }),
            _ => Err(CrushStepError::AmbiguousPath {
                path: path.to_string(),
                matches: found.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        id: NodeId,
        name: &str,
        tp: &str,
        weight: Option<f64>,
        children: &[NodeId],
    ) -> NodeRecord {
        NodeRecord {
            id,
            name: name.to_string(),
            node_type: tp.to_string(),
            crush_weight: weight,
            children: children.to_vec(),
        }
    }

    fn path(segments: &[(&str, &str)]) -> HierarchicalPath {
        segments.iter().copied().collect()
    }

    fn single_host() -> Topology {
        Topology::build(vec![
            record(0, "d0", "device", Some(1.0), &[]),
            record(-2, "h1", "host", None, &[0]),
            record(-1, "default", "root", None, &[-2]),
        ])
        .unwrap()
    }

    #[test]
    fn test_build_links_children_listed_before_parents() {
        let topo = single_host();
        assert_eq!(topo.len(), 3);
        assert_eq!(topo.roots().len(), 1);

        let root = topo.node(topo.roots()[0]);
        assert_eq!(root.name, "default");
        let host = topo.node(root.children[0]);
        assert_eq!(host.name, "h1");
        assert_eq!(topo.node(host.children[0]).weight, Some(1.0));
    }

    #[test]
    fn test_build_unknown_child_is_malformed() {
        let err = Topology::build(vec![record(-1, "default", "root", None, &[7])]).unwrap_err();
        assert!(matches!(err, CrushStepError::MalformedTopology(_)));
    }

    #[test]
    fn test_build_shared_child_is_malformed() {
        let err = Topology::build(vec![
            record(0, "d0", "device", Some(1.0), &[]),
            record(-2, "h1", "host", None, &[0]),
            record(-3, "h2", "host", None, &[0]),
        ])
        .unwrap_err();
        assert!(matches!(err, CrushStepError::MalformedTopology(_)));
    }

    #[test]
    fn test_build_cycle_is_malformed() {
        let err = Topology::build(vec![
            record(-1, "a", "rack", None, &[-2]),
            record(-2, "b", "rack", None, &[-1]),
        ])
        .unwrap_err();
        assert!(matches!(err, CrushStepError::MalformedTopology(_)));
    }

    #[test]
    fn test_multiple_roots() {
        let topo = Topology::build(vec![
            record(-1, "default", "root", None, &[]),
            record(-5, "ssd", "root", None, &[]),
        ])
        .unwrap();
        assert_eq!(topo.roots().len(), 2);
    }

    #[test]
    fn test_resolve_device() {
        let topo = single_host();
        let idx = topo
            .resolve(&path(&[("root", "default"), ("host", "h1"), ("device", "d0")]))
            .unwrap();
        assert_eq!(topo.node(idx).name, "d0");
        assert_eq!(topo.get(0), Some(idx));
    }

    #[test]
    fn test_resolve_missing() {
        let topo = single_host();
        let err = topo
            .resolve(&path(&[("root", "default"), ("host", "h1"), ("device", "missing")]))
            .unwrap_err();
        assert!(matches!(err, CrushStepError::NodeNotFound { .. }));
    }

    #[test]
    fn test_resolve_ambiguous_when_hosts_share_a_name() {
        let topo = Topology::build(vec![
            record(-1, "default", "root", None, &[-2, -3]),
            record(-2, "h1", "host", None, &[0]),
            record(-3, "h1", "host", None, &[1]),
            record(0, "d0", "device", Some(1.0), &[]),
            record(1, "d0", "device", Some(1.0), &[]),
        ])
        .unwrap();

        let err = topo
            .resolve(&path(&[("root", "default"), ("host", "h1"), ("device", "d0")]))
            .unwrap_err();
        assert!(matches!(err, CrushStepError::AmbiguousPath { matches: 2, .. }));
    }

    #[test]
    fn test_resolve_skipped_level_is_not_found() {
        let topo = Topology::build(vec![
            record(-1, "default", "root", None, &[-2, -3]),
            record(-2, "h1", "host", None, &[0]),
            record(-3, "h2", "host", None, &[1]),
            record(0, "d0", "device", Some(1.0), &[]),
            record(1, "d0", "device", Some(1.0), &[]),
        ])
        .unwrap();

        // Segments must follow the tree level by level
        let err = topo
            .resolve(&path(&[("root", "default"), ("device", "d0")]))
            .unwrap_err();
        assert!(matches!(err, CrushStepError::NodeNotFound { .. }));

        let idx = topo
            .resolve(&path(&[("root", "default"), ("host", "h2"), ("device", "d0")]))
            .unwrap();
        assert_eq!(topo.node(idx).id, 1);
    }

    #[test]
    fn test_empty_path_yields_roots() {
        let topo = single_host();
        assert_eq!(topo.find_nodes(&HierarchicalPath::default()), topo.roots().to_vec());
    }

    #[test]
    fn test_from_json_osd_tree() {
        let json = r#"{
            "nodes": [
                {"id": -1, "name": "default", "type": "root", "type_id": 10, "children": [-3]},
                {"id": -3, "name": "osd-0", "type": "host", "type_id": 1, "children": [0]},
                {"id": 0, "name": "osd.0", "type": "osd", "type_id": 0,
                 "crush_weight": 0.5, "depth": 2, "status": "up", "reweight": 1.0}
            ],
            "stray": []
        }"#;
        let topo = Topology::from_json(json).unwrap();
        let idx = topo
            .resolve(&path(&[("root", "default"), ("host", "osd-0"), ("osd", "osd.0")]))
            .unwrap();
        assert_eq!(topo.node(idx).weight, Some(0.5));
        assert_eq!(
            topo.node(idx).to_string(),
            "osd(name=\"osd.0\", weight=0.5, id=0)"
        );
    }

    #[test]
    fn test_path_location_args() {
        let p = path(&[("root", "default"), ("host", "osd-0"), ("osd", "osd.0")]);
        assert_eq!(p.location_args(), vec!["root=default", "host=osd-0"]);
        assert_eq!(p.to_string(), "[root=default host=osd-0 osd=osd.0]");
    }
}
