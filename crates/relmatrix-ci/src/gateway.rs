//! Remote execution gateway: run a command on the leased host and move
//! paths to and from it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use relmatrix_core::{MatrixError, MatrixResult, NodeLease};
use tokio::process::Command;
use tracing::debug;

/// ssh exits with 255 when the connection itself failed.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Primitive, fallible remote operations against a leased host.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Run `command` on the host. Non-zero exit is an error.
    async fn execute(&self, lease: &NodeLease, command: &str) -> MatrixResult<CommandOutput>;

    /// Copy a local path to the host's working root.
    async fn push(&self, lease: &NodeLease, path: &Path) -> MatrixResult<()>;

    /// Copy a path from the host's working root back to the control side.
    async fn pull(&self, lease: &NodeLease, path: &Path) -> MatrixResult<()>;
}

/// Fixed non-interactive connection profile.
#[derive(Debug, Clone)]
pub struct SshProfile {
    pub user: String,
    pub ssh_program: String,
    pub rsync_program: String,
}

impl Default for SshProfile {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            ssh_program: "ssh".to_string(),
            rsync_program: "rsync".to_string(),
        }
    }
}

impl SshProfile {
    /// Options passed to every ssh invocation.
    pub fn ssh_options(&self) -> Vec<String> {
        [
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "BatchMode=yes",
            "-o",
            "LogLevel=ERROR",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn destination(&self, lease: &NodeLease) -> String {
        format!("{}@{}", self.user, lease.host_id)
    }
}

/// Gateway backed by the `ssh` and `rsync` binaries.
#[derive(Debug, Clone)]
pub struct SshGateway {
    profile: SshProfile,
    /// Directory on the host that pushed paths land in.
    remote_root: PathBuf,
    /// Directory on the control side that pulled paths land in.
    local_root: PathBuf,
}

impl SshGateway {
    pub fn new(profile: SshProfile, remote_root: PathBuf, local_root: PathBuf) -> Self {
        Self {
            profile,
            remote_root,
            local_root,
        }
    }

    /// Arguments for `ssh` running `command` on the lease's host.
    pub fn ssh_args(&self, lease: &NodeLease, command: &str) -> Vec<String> {
        let mut args = self.profile.ssh_options();
        args.push(self.profile.destination(lease));
        args.push(command.to_string());
        args
    }

    /// Arguments for an rsync transfer in either direction.
    pub fn rsync_args(&self, lease: &NodeLease, path: &Path, direction: Transfer) -> Vec<String> {
        let remote_shell = format!(
            "{} {}",
            self.profile.ssh_program,
            self.profile.ssh_options().join(" ")
        );
        let remote = format!(
            "{}:{}",
            self.profile.destination(lease),
            self.remote_root.display()
        );

        let (source, target) = match direction {
            Transfer::Push => (
                path.display().to_string(),
                format!("{}/", remote),
            ),
            Transfer::Pull => (
                format!("{}/{}", remote, path.display()),
                format!("{}/", self.local_root.display()),
            ),
        };

        vec![
            "--archive".to_string(),
            "--compress".to_string(),
            "-e".to_string(),
            remote_shell,
            source,
            target,
        ]
    }

    async fn run(&self, lease: &NodeLease, program: &str, args: Vec<String>) -> MatrixResult<CommandOutput> {
        debug!(host = %lease.host_id, program = %program, "spawning remote transport");

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MatrixError::TransientRemote {
                host: lease.host_id.clone(),
                detail: format!("failed to spawn {program}: {e}"),
            })?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        classify(lease, result)
    }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Push,
    Pull,
}

fn classify(lease: &NodeLease, output: CommandOutput) -> MatrixResult<CommandOutput> {
    match output.exit_code {
        0 => Ok(output),
        SSH_TRANSPORT_EXIT | -1 => Err(MatrixError::TransientRemote {
            host: lease.host_id.clone(),
            detail: output.stderr.trim().to_string(),
        }),
        code => Err(MatrixError::RemoteExecution {
            exit_code: code,
            stderr: output.stderr,
        }),
    }
}

#[async_trait]
impl RemoteGateway for SshGateway {
    async fn execute(&self, lease: &NodeLease, command: &str) -> MatrixResult<CommandOutput> {
        let args = self.ssh_args(lease, command);
        self.run(lease, &self.profile.ssh_program, args).await
    }

    async fn push(&self, lease: &NodeLease, path: &Path) -> MatrixResult<()> {
        let args = self.rsync_args(lease, path, Transfer::Push);
        self.run(lease, &self.profile.rsync_program, args).await?;
        Ok(())
    }

    async fn pull(&self, lease: &NodeLease, path: &Path) -> MatrixResult<()> {
        tokio::fs::create_dir_all(&self.local_root).await?;
        let args = self.rsync_args(lease, path, Transfer::Pull);
        self.run(lease, &self.profile.rsync_program, args).await?;
        Ok(())
    }
}
