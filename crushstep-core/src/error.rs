//! Error types for crushstep
//!
//! Provides a unified error type for topology, configuration and
//! cluster-command failures. Every variant is fatal to a run: nothing is
//! retried and already-applied weight changes are left in place.

use thiserror::Error;

/// Result type alias for crushstep operations
pub type Result<T> = std::result::Result<T, CrushStepError>;

/// Unified error type for crushstep
#[derive(Error, Debug)]
pub enum CrushStepError {
    // ===== Topology Errors =====
    #[error("Malformed topology: {0}")]
    MalformedTopology(String),

    #[error("Can't find any node with path {path}")]
    NodeNotFound { path: String },

    #[error("Found {matches} nodes for path {path} (should be only 1)")]
    AmbiguousPath { path: String, matches: usize },

    #[error("Node at path {path} has no crush weight")]
    UnweightedNode { path: String },

    // ===== External Command Errors =====
    #[error("Command `{command}` failed ({status}): {stderr}")]
    ExternalCommand {
        command: String,
        status: String,
        stderr: String,
    },

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    ConfigValidation(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CrushStepError {
    /// True for errors raised before any cluster interaction took place
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CrushStepError::ConfigValidation(_) | CrushStepError::Yaml(_)
        )
    }
}
