//! Working volume and snapshot operations

use super::Ec2Client;
use crate::aws::error::classify_anyhow_error;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{ResourceType, SnapshotState, VolumeState};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{info, warn};

impl Ec2Client {
    /// Detach a volume from whatever instance it is attached to.
    ///
    /// Throttling and a volume that is still busy are retried with backoff.
    pub async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        info!(volume_id = %volume_id, "Detaching volume");

        (|| self.do_detach_volume(volume_id))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(2))
                    .with_max_delay(Duration::from_secs(20))
                    .with_max_times(4),
            )
            .when(|e| classify_anyhow_error(e).is_retryable())
            .notify(|e, dur| {
                warn!(volume_id = %volume_id, delay = ?dur, error = %e, "Detach not accepted yet, backing off");
            })
            .await
    }

    async fn do_detach_volume(&self, volume_id: &str) -> Result<()> {
        self.client
            .detach_volume()
            .volume_id(volume_id)
            .send()
            .await
            .with_context(|| format!("Failed to detach volume {volume_id}"))?;

        Ok(())
    }

    pub async fn volume_state(&self, volume_id: &str) -> Result<VolumeState> {
        let response = self
            .client
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await
            .with_context(|| format!("Failed to describe volume {volume_id}"))?;

        response
            .volumes()
            .first()
            .and_then(|v| v.state())
            .cloned()
            .with_context(|| format!("Volume {volume_id} has no state"))
    }

    /// Start a snapshot of a volume
    pub async fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<String> {
        info!(volume_id = %volume_id, "Creating snapshot");

        let response = self
            .client
            .create_snapshot()
            .volume_id(volume_id)
            .description(description)
            .set_tag_specifications(self.tag_specs(&[(ResourceType::Snapshot, "snapshot")]))
            .send()
            .await
            .with_context(|| format!("Failed to create snapshot of {volume_id}"))?;

        let snapshot_id = response
            .snapshot_id()
            .context("CreateSnapshot returned no snapshot id")?
            .to_string();

        info!(snapshot_id = %snapshot_id, "Snapshot started");
        Ok(snapshot_id)
    }

    pub async fn snapshot_state(&self, snapshot_id: &str) -> Result<SnapshotState> {
        let response = self
            .client
            .describe_snapshots()
            .snapshot_ids(snapshot_id)
            .send()
            .await
            .with_context(|| format!("Failed to describe snapshot {snapshot_id}"))?;

        response
            .snapshots()
            .first()
            .and_then(|s| s.state())
            .cloned()
            .with_context(|| format!("Snapshot {snapshot_id} has no state"))
    }

    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        info!(volume_id = %volume_id, "Deleting volume");

        self.client
            .delete_volume()
            .volume_id(volume_id)
            .send()
            .await
            .with_context(|| format!("Failed to delete volume {volume_id}"))?;

        Ok(())
    }

    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        info!(snapshot_id = %snapshot_id, "Deleting snapshot");

        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .with_context(|| format!("Failed to delete snapshot {snapshot_id}"))?;

        Ok(())
    }
}
