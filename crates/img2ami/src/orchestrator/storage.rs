//! Working volume and snapshot lifecycle

use crate::aws::VolumeOperations;
use crate::aws::error::ignore_not_found;
use crate::error::RegistrationError;
use crate::wait::{WaitConfig, wait_until};
use anyhow::anyhow;
use aws_sdk_ec2::types::{SnapshotState, VolumeState};
use img2ami_common::{SnapshotId, VolumeId};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct StorageLifecycle<'a, V> {
    ops: &'a V,
    available: WaitConfig,
    completed: WaitConfig,
    cancel: CancellationToken,
}

impl<'a, V: VolumeOperations> StorageLifecycle<'a, V> {
    pub fn new(
        ops: &'a V,
        available: WaitConfig,
        completed: WaitConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ops,
            available,
            completed,
            cancel,
        }
    }

    pub async fn detach(&self, volume_id: &VolumeId) -> Result<(), RegistrationError> {
        self.ops
            .detach_volume(volume_id.as_str())
            .await
            .map_err(|e| RegistrationError::operation(format!("detach volume {volume_id}"), e))
    }

    pub async fn await_available(&self, volume_id: &VolumeId) -> Result<(), RegistrationError> {
        wait_until(
            &self.available,
            Some(&self.cancel),
            &format!("volume {volume_id} available"),
            || self.ops.volume_state(volume_id.as_str()),
            |state| *state == VolumeState::Available,
        )
        .await?;

        info!(volume_id = %volume_id, "Volume is available");
        Ok(())
    }

    /// Start a snapshot; a missing or malformed id is a create failure
    pub async fn snapshot(
        &self,
        volume_id: &VolumeId,
        description: &str,
    ) -> Result<SnapshotId, RegistrationError> {
        let operation = format!("snapshot volume {volume_id}");
        let raw = self
            .ops
            .create_snapshot(volume_id.as_str(), description)
            .await
            .map_err(|e| RegistrationError::operation(operation.as_str(), e))?;

        SnapshotId::parse(raw).map_err(|e| RegistrationError::operation(operation.as_str(), e))
    }

    /// Wait for the snapshot to complete; an `error` state ends the wait early
    pub async fn await_completed(&self, snapshot_id: &SnapshotId) -> Result<(), RegistrationError> {
        wait_until(
            &self.completed,
            Some(&self.cancel),
            &format!("snapshot {snapshot_id} completed"),
            || async {
                let state = self.ops.snapshot_state(snapshot_id.as_str()).await?;
                if state == SnapshotState::Error {
                    return Err(anyhow!("snapshot {snapshot_id} failed"));
                }
                Ok(state)
            },
            |state| *state == SnapshotState::Completed,
        )
        .await?;

        info!(snapshot_id = %snapshot_id, "Snapshot completed");
        Ok(())
    }

    /// Delete the volume. A volume that no longer exists counts as deleted.
    pub async fn delete(&self, volume_id: &VolumeId) -> Result<(), RegistrationError> {
        ignore_not_found(self.ops.delete_volume(volume_id.as_str()).await)
            .map_err(|e| RegistrationError::operation(format!("delete volume {volume_id}"), e))
    }
}
