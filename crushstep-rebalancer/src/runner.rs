//! External command execution
//!
//! Every cluster interaction goes through a [`CommandRunner`], so the
//! collaborators in [`crate::cluster`] can be driven by a fake in tests.

use async_trait::async_trait;
use crushstep_core::{CrushStepError, Result};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Runs an administration command line and returns its stdout.
///
/// A nonzero exit status is an error; nothing is retried.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String]) -> Result<String>;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    async fn run(&self, argv: &[String]) -> Result<String> {
        (**self).run(argv).await
    }
}

/// Spawns real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<String> {
        let command = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| {
            CrushStepError::ConfigValidation("empty command line".to_string())
        })?;

        debug!(command = %command, "Running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CrushStepError::ExternalCommand {
                command: command.clone(),
                status: "spawn failed".to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CrushStepError::ExternalCommand {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Build an owned argv from string slices
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
