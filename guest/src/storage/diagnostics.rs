//! Best-effort diagnostics for failed SCSI disk lookups.
//!
//! When a hotplugged SCSI disk cannot be resolved, dumping what the kernel
//! does see is usually the fastest way to tell a host-side attach problem
//! from a guest-side one.

use std::path::Path;

use async_trait::async_trait;
use hotmount_shared::errors::{HotmountError, HotmountResult};
use tokio::process::Command;

/// Hook run before a SCSI resolution error is returned.
///
/// An error from the hook is logged by the caller and never replaces the
/// resolution error.
#[async_trait]
pub trait DiagnosticsHook: Send + Sync {
    async fn dump(&self, scsi_addr: &str) -> HotmountResult<()>;
}

/// Runs read-only commands and logs their combined output.
#[derive(Debug, Clone)]
pub struct CommandDiagnostics {
    commands: Vec<Vec<String>>,
}

impl CommandDiagnostics {
    /// `ls -la <scsi_disk_dir>/` and `lsblk`.
    pub fn new(scsi_disk_dir: &Path) -> Self {
        Self {
            commands: vec![
                vec![
                    "ls".to_string(),
                    "-la".to_string(),
                    format!("{}/", scsi_disk_dir.display()),
                ],
                vec!["lsblk".to_string()],
            ],
        }
    }

    /// Use an explicit command list (program followed by its arguments).
    pub fn with_commands(commands: Vec<Vec<String>>) -> Self {
        Self { commands }
    }

    async fn run(argv: &[String]) -> HotmountResult<String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HotmountError::InvalidArgument("empty diagnostic command".into()))?;

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| HotmountError::io(format!("Failed to run {}", program), e))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(HotmountError::Storage(format!(
                "{} exited with {}: {}",
                argv.join(" "),
                output.status,
                combined.trim()
            )));
        }
        Ok(combined)
    }
}

#[async_trait]
impl DiagnosticsHook for CommandDiagnostics {
    async fn dump(&self, scsi_addr: &str) -> HotmountResult<()> {
        for argv in &self.commands {
            let output = Self::run(argv).await?;
            tracing::info!(scsi_addr, "{} output:\n{}", argv.join(" "), output);
        }
        Ok(())
    }
}

/// Does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

#[async_trait]
impl DiagnosticsHook for NoDiagnostics {
    async fn dump(&self, _scsi_addr: &str) -> HotmountResult<()> {
        Ok(())
    }
}
