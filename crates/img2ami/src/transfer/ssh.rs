//! ssh/scp implementation of [`RemoteTransfer`]

use super::RemoteTransfer;
use anyhow::{Context, Result, bail};
use img2ami_common::defaults::REMOTE_IMAGE_PATH;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Exit status and captured stderr of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

/// Run a command to completion, killing it if `timeout` elapses.
///
/// The child is killed when the returned future is dropped, so cancelling a
/// run does not leave ssh or scp processes behind.
pub async fn run_command(program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    debug!(cmd = %program, args = ?args, timeout_secs = timeout.as_secs(), "Running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn command: {program}"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.with_context(|| format!("Failed waiting for {program}"))?,
        Err(_) => {
            warn!(cmd = %program, timeout_secs = timeout.as_secs(), "Command timed out");
            bail!("{program} timed out after {}s", timeout.as_secs());
        }
    };

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Transfer over ssh/scp, authenticated with a key file
#[derive(Debug, Clone)]
pub struct SshTransfer {
    identity_file: PathBuf,
    user: String,
    connect_timeout: Duration,
    transfer_timeout: Duration,
}

impl SshTransfer {
    pub fn new(
        identity_file: impl Into<PathBuf>,
        user: impl Into<String>,
        connect_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            identity_file: identity_file.into(),
            user: user.into(),
            connect_timeout,
            transfer_timeout,
        }
    }

    /// Options shared by ssh and scp
    fn common_options(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.identity_file.display().to_string()];
        for option in [
            "BatchMode=yes".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
        ] {
            args.push("-o".to_string());
            args.push(option);
        }
        args
    }

    fn destination(&self, address: &str) -> String {
        format!("{}@{}", self.user, address)
    }

    fn ssh_args(&self, address: &str, remote_command: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push(self.destination(address));
        args.push(remote_command.to_string());
        args
    }

    fn scp_args(&self, address: &str, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.destination(address), remote_path));
        args
    }

    /// Probe timeout: connect plus a little slack for the command itself
    fn probe_timeout(&self) -> Duration {
        self.connect_timeout + Duration::from_secs(10)
    }
}

/// Remote shell command that writes `source` onto `device` and flushes it
fn device_write_command(source: &str, device: &str) -> String {
    format!("sudo dd if={source} of={device} bs=4M conv=sparse,fsync status=none && sync")
}

impl RemoteTransfer for SshTransfer {
    async fn device_ready(&self, address: &str, device: &str) -> Result<bool> {
        let output = run_command(
            "ssh",
            &self.ssh_args(address, &format!("test -b {device}")),
            self.probe_timeout(),
        )
        .await;

        match output {
            Ok(output) if output.success => Ok(true),
            Ok(output) => {
                debug!(address = %address, code = ?output.code, stderr = %output.stderr, "Device not ready");
                Ok(false)
            }
            Err(e) => {
                debug!(address = %address, error = %e, "Device probe failed");
                Ok(false)
            }
        }
    }

    async fn upload(&self, address: &str, local: &Path) -> Result<String> {
        info!(address = %address, image = %local.display(), "Uploading image");

        let output = run_command(
            "scp",
            &self.scp_args(address, local, REMOTE_IMAGE_PATH),
            self.transfer_timeout,
        )
        .await?;
        if !output.success {
            bail!("scp exited with {:?}: {}", output.code, output.stderr);
        }

        info!(remote_path = %REMOTE_IMAGE_PATH, "Upload complete");
        Ok(REMOTE_IMAGE_PATH.to_string())
    }

    async fn write_to_device(&self, address: &str, remote_path: &str, device: &str) -> Result<()> {
        info!(address = %address, device = %device, "Writing image to device");

        let output = run_command(
            "ssh",
            &self.ssh_args(address, &device_write_command(remote_path, device)),
            self.transfer_timeout,
        )
        .await?;
        if !output.success {
            bail!("device write exited with {:?}: {}", output.code, output.stderr);
        }

        info!(device = %device, "Image written");
        Ok(())
    }
}
