//! crushstep Rebalancer Library
//!
//! Gradual CRUSH weight migration for Ceph clusters.
//!
//! Moving a device's weight in one jump triggers a burst of data movement
//! proportional to the change. The rebalancer instead:
//! - Resolves configured locations against the live `osd tree`
//! - Optionally estimates the total data movement of the final state
//! - Steps weights in bounded increments, a bounded number of devices at a time
//! - Waits for placement groups to return to `active+clean` between rounds

pub mod cluster;
pub mod config;
pub mod console;
pub mod estimator;
pub mod monitor;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod target;

// Re-export main types
pub use cluster::{
    CephCluster, HealthSource, MapStore, NodeRemap, PgStateCount, PlacementDiff, RemapTool,
    TopologySource, WeightSink,
};
pub use config::{OsdTarget, RebalanceConfig, SelectionPolicy};
pub use console::Console;
pub use estimator::{estimate, RebalanceEstimate};
pub use monitor::{CompletionMonitor, MonitorConfig, WaitOutcome};
pub use runner::{CommandRunner, ProcessRunner};
pub use scheduler::{plan_step, RebalanceOutcome, RebalanceStats, Scheduler, SchedulerConfig};
pub use session::{EstimateMode, RebalanceSession, RunOptions, SessionOutcome};
pub use target::{resolve_targets, RebalanceTarget};
