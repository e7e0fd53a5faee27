//! Rebalance configuration
//!
//! Loaded from a YAML file:
//!
//! ```yaml
//! # max weight change step
//! step: 0.1
//! # max OSDs reweighted in parallel
//! max_reweight: 1
//! # minimal weight difference to be corrected
//! min_weight_diff: 0.01
//! osd_selection: rround
//! osds:
//!   - osd: osd.0
//!     root: default
//!     host: osd-0
//!     weight: 0.3
//! ```

use crushstep_core::{level_rank, CrushStepError, HierarchicalPath, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::monitor::MonitorConfig;
use crate::scheduler::SchedulerConfig;

/// Overrides `ceph_command`, including a value set in the config file
pub const CEPH_COMMAND_ENV: &str = "CRUSHSTEP_CEPH";

/// How the scheduler picks the next batch of targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SelectionPolicy {
    /// Serve targets in rotation so long migrations don't starve short ones
    #[default]
    #[serde(rename = "rround")]
    RoundRobin,
}

/// One `osds` entry: a CRUSH location plus the desired final weight
#[derive(Debug, Clone, Deserialize)]
pub struct OsdTarget {
    pub weight: f64,
    /// Level name to bucket/device name, e.g. `root: default`, `osd: osd.0`
    #[serde(flatten)]
    pub location: BTreeMap<String, String>,
}

impl OsdTarget {
    /// Location ordered from the least specific level down to the device
    pub fn path(&self) -> Result<HierarchicalPath> {
        if self.location.is_empty() {
            return Err(CrushStepError::ConfigValidation(
                "osds entry has no location".to_string(),
            ));
        }

        let mut ranked = Vec::with_capacity(self.location.len());
        for (level, name) in &self.location {
            let rank = level_rank(level).ok_or_else(|| {
                CrushStepError::ConfigValidation(format!("unknown CRUSH level '{}'", level))
            })?;
            ranked.push((rank, level.clone(), name.clone()));
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(ranked
            .into_iter()
            .map(|(_, level, name)| (level, name))
            .collect())
    }
}

/// Rebalance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
    /// Max absolute weight change applied to one node per round
    #[serde(default = "default_step")]
    pub step: f64,

    /// Max number of nodes advanced per round
    #[serde(default = "default_max_reweight")]
    pub max_reweight: usize,

    /// Convergence tolerance, also the smallest change worth a command
    #[serde(default = "default_min_weight_diff")]
    pub min_weight_diff: f64,

    #[serde(default)]
    pub osd_selection: SelectionPolicy,

    #[serde(default)]
    pub osds: Vec<OsdTarget>,

    /// Delay before the first health poll after issuing updates
    #[serde(default = "default_interval_secs")]
    pub grace_period_secs: u64,

    /// Delay between health polls
    #[serde(default = "default_interval_secs")]
    pub poll_interval_secs: u64,

    /// `ceph` binary; [`CEPH_COMMAND_ENV`] takes precedence
    #[serde(default = "default_ceph_command")]
    pub ceph_command: String,

    /// Map-diff tool; the before and after osdmap paths are appended
    #[serde(default = "default_remap_command")]
    pub remap_command: Vec<String>,
}

fn default_step() -> f64 {
    0.5
}

fn default_max_reweight() -> usize {
    4
}

fn default_min_weight_diff() -> f64 {
    0.01
}

fn default_interval_secs() -> u64 {
    5
}

fn default_ceph_command() -> String {
    "ceph".to_string()
}

fn default_remap_command() -> Vec<String> {
    vec!["calculate-remap".to_string()]
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            max_reweight: default_max_reweight(),
            min_weight_diff: default_min_weight_diff(),
            osd_selection: SelectionPolicy::default(),
            osds: Vec::new(),
            grace_period_secs: default_interval_secs(),
            poll_interval_secs: default_interval_secs(),
            ceph_command: default_ceph_command(),
            remap_command: default_remap_command(),
        }
    }
}

impl RebalanceConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides(std::env::var(CEPH_COMMAND_ENV).ok());
        Ok(config)
    }

    fn apply_env_overrides(&mut self, ceph_command: Option<String>) {
        if let Some(ceph) = ceph_command.filter(|c| !c.is_empty()) {
            self.ceph_command = ceph;
        }
    }

    /// Read and parse a YAML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Reject values the scheduler cannot make progress with
    pub fn validate(&self) -> Result<()> {
        if !(self.step > 0.0) {
            return Err(invalid("step", self.step));
        }
        if !(self.min_weight_diff > 0.0) {
            return Err(invalid("min_weight_diff", self.min_weight_diff));
        }
        // A step at or below the tolerance would never issue a command
        if self.step <= self.min_weight_diff {
            return Err(CrushStepError::ConfigValidation(format!(
                "step ({}) must be greater than min_weight_diff ({})",
                self.step, self.min_weight_diff
            )));
        }
        if self.max_reweight == 0 {
            return Err(invalid("max_reweight", self.max_reweight));
        }
        if self.osds.is_empty() {
            return Err(CrushStepError::ConfigValidation(
                "no osds listed".to_string(),
            ));
        }
        for osd in &self.osds {
            if !osd.weight.is_finite() || osd.weight < 0.0 {
                return Err(invalid("weight", osd.weight));
            }
            osd.path()?;
        }
        if self.remap_command.is_empty() {
            return Err(CrushStepError::ConfigValidation(
                "remap_command is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            step: self.step,
            max_reweight: self.max_reweight,
            min_weight_diff: self.min_weight_diff,
            selection: self.osd_selection,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            grace_period: self.grace_period(),
            poll_interval: self.poll_interval(),
        }
    }
}

fn invalid(key: &str, value: impl std::fmt::Display) -> CrushStepError {
    CrushStepError::ConfigValidation(format!("invalid value for {}: {}", key, value))
}
