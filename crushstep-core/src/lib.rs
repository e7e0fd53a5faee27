//! crushstep Core Library
//!
//! Shared building blocks for gradual CRUSH weight migration.
//! This crate provides:
//! - The CRUSH topology model (flat `osd tree` records to an arena-backed forest)
//! - Hierarchical path resolution against that forest
//! - The error taxonomy shared by every crushstep crate
//! - Human-readable byte formatting for operator output

pub mod error;
pub mod topology;
pub mod units;

pub use error::{CrushStepError, Result};
pub use topology::{
    HierarchicalPath, NodeId, NodeIndex, NodeRecord, OsdTree, Topology, TopologyNode,
};
pub use units::format_bytes;

/// CRUSH level names ordered from most to least specific.
///
/// Config locations are sorted by this ordering (reversed) so that the
/// root comes first and the device itself is the final path segment.
pub const LEVEL_ORDER: [&str; 11] = [
    "osd",
    "host",
    "chassis",
    "rack",
    "row",
    "pdu",
    "pod",
    "room",
    "datacenter",
    "region",
    "root",
];

/// Position of a level name in [`LEVEL_ORDER`], if it is a known level.
pub fn level_rank(level: &str) -> Option<usize> {
    LEVEL_ORDER.iter().position(|l| *l == level)
}
