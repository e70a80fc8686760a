//! Moving the image onto the worker's working volume
//!
//! The copy and the privileged device write happen on the worker over
//! ssh/scp; the orchestrator only sees the [`RemoteTransfer`] trait.

mod ssh;

pub use ssh::{CommandOutput, SshTransfer, run_command};

use crate::wait::{WaitConfig, WaitError, wait_until};
use anyhow::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Remote side of the image transfer
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait RemoteTransfer: Send + Sync {
    /// Probe once whether `device` exists as a block device on the worker.
    ///
    /// An unreachable worker is `Ok(false)`, not an error.
    async fn device_ready(&self, address: &str, device: &str) -> Result<bool>;

    /// Copy the local image to the worker, returning the remote path
    async fn upload(&self, address: &str, local: &Path) -> Result<String>;

    /// Write the uploaded image onto `device` and flush it
    async fn write_to_device(&self, address: &str, remote_path: &str, device: &str) -> Result<()>;
}

/// Poll until the working volume shows up on the worker
pub async fn wait_for_device<T: RemoteTransfer>(
    transfer: &T,
    address: &str,
    device: &str,
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
) -> Result<(), WaitError> {
    wait_until(
        config,
        cancel,
        &format!("device {device} on {address}"),
        || transfer.device_ready(address, device),
        |ready| *ready,
    )
    .await
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    #[tokio::test(start_paused = true)]
    async fn test_device_wait_stops_at_first_ready_probe() {
        let mut transfer = MockRemoteTransfer::new();
        let mut seq = Sequence::new();
        transfer
            .expect_device_ready()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(false));
        transfer
            .expect_device_ready()
            .withf(|address, device| address == "203.0.113.7" && device == "/dev/xvdf")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(true));

        let config = WaitConfig::from_secs(30, 6, 10);
        wait_for_device(&transfer, "203.0.113.7", "/dev/xvdf", &config, None)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_never_ready_times_out() {
        let mut transfer = MockRemoteTransfer::new();
        transfer
            .expect_device_ready()
            .times(10)
            .returning(|_, _| Ok(false));

        let config = WaitConfig::from_secs(30, 6, 10);
        let err = wait_for_device(&transfer, "203.0.113.7", "/dev/xvdf", &config, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout { polls: 10, .. }));
    }
}
