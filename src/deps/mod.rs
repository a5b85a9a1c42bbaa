//! Dependency preparation — makes sure each service directory has its packages
//! installed before anything is launched.
//!
//! Installation is skipped when the marker (`node_modules` by default) already
//! exists, so repeated runs cost nothing.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::DependencyConfig;
use crate::supervisor::SupervisorError;
use crate::utils::apply_creation_flags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    AlreadySatisfied,
    Installed,
    Skipped,
}

pub struct DependencyPreparer {
    enabled: bool,
    install_command: Vec<String>,
    marker: String,
}

impl DependencyPreparer {
    pub fn new(config: &DependencyConfig) -> Self {
        Self {
            enabled: config.enabled,
            install_command: config.install_command.clone(),
            marker: config.marker.clone(),
        }
    }

    /// Whether the install marker already exists in `dir`.
    pub fn is_satisfied(&self, dir: &Path) -> bool {
        dir.join(&self.marker).exists()
    }

    /// Install dependencies in `dir` unless they are already there.
    ///
    /// A non-zero exit of the install command is a [`SupervisorError::SetupFailure`]
    /// carrying the command's stderr (or stdout when stderr is empty).
    pub async fn ensure(&self, dir: &Path, name: &str) -> Result<DependencyStatus, SupervisorError> {
        if !self.enabled {
            tracing::debug!("Dependency check disabled, skipping {}", name);
            return Ok(DependencyStatus::Skipped);
        }

        if self.is_satisfied(dir) {
            tracing::debug!("{} dependencies present in {}", name, dir.display());
            return Ok(DependencyStatus::AlreadySatisfied);
        }

        let (program, args) = self
            .install_command
            .split_first()
            .ok_or_else(|| SupervisorError::InvalidConfig("dependencies.install_command is empty".into()))?;

        tracing::info!("Installing {} dependencies in {}: {}", name, dir.display(), self.install_command.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_creation_flags(&mut cmd);

        let output = cmd.output().await.map_err(|e| SupervisorError::SetupFailure {
            name: name.to_string(),
            code: None,
            diagnostics: format!("failed to run '{}': {}", program, e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostics = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim_end().to_string()
            } else {
                stderr.trim_end().to_string()
            };
            tracing::error!("{} dependency install exited with {}", name, output.status);
            return Err(SupervisorError::SetupFailure {
                name: name.to_string(),
                code: output.status.code(),
                diagnostics,
            });
        }

        Ok(DependencyStatus::Installed)
    }
}
