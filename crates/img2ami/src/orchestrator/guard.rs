//! Ownership of live ephemeral resources
//!
//! The guard tracks at most one worker instance and one detached working
//! volume. Components acquire a handle right after the creation call returns
//! and release it once the resource is gone. Whatever is still tracked when a
//! run fails or is interrupted is released by [`CleanupGuard::compensate`].
//! Nothing happens on drop: compensation is always an explicit, awaited call.

use super::provision::ComputeProvisioner;
use super::storage::StorageLifecycle;
use crate::aws::{InstanceOperations, VolumeOperations};
use img2ami_common::{InstanceId, VolumeId};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct CleanupGuard {
    instance: Option<InstanceId>,
    volume: Option<VolumeId>,
}

/// What a compensation pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Nothing was tracked
    Nothing,
    /// The worker was terminated; `stranded_volume` was tracked but left in place
    TerminatedInstance { stranded_volume: Option<VolumeId> },
    DeletedVolume(VolumeId),
    /// The provider call failed; the handle stays tracked
    Failed,
}

impl CleanupGuard {
    /// Track a worker instance, returning any instance it displaces
    pub fn acquire_instance(&mut self, instance_id: InstanceId) -> Option<InstanceId> {
        self.instance.replace(instance_id)
    }

    /// Track a detached working volume, returning any volume it displaces
    pub fn acquire_volume(&mut self, volume_id: VolumeId) -> Option<VolumeId> {
        self.volume.replace(volume_id)
    }

    pub fn release_instance(&mut self) -> Option<InstanceId> {
        self.instance.take()
    }

    pub fn release_volume(&mut self) -> Option<VolumeId> {
        self.volume.take()
    }

    pub fn instance(&self) -> Option<&InstanceId> {
        self.instance.as_ref()
    }

    pub fn volume(&self) -> Option<&VolumeId> {
        self.volume.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.instance.is_none() && self.volume.is_none()
    }

    /// The handle compensation would act on next, as `"<kind> <id>"`
    pub fn describe_tracked(&self) -> Option<String> {
        match (&self.instance, &self.volume) {
            (Some(instance_id), _) => Some(format!("instance {instance_id}")),
            (None, Some(volume_id)) => Some(format!("volume {volume_id}")),
            (None, None) => None,
        }
    }

    /// Release whatever is tracked.
    ///
    /// A tracked instance takes precedence: only the instance is terminated,
    /// and a tracked volume is logged so it can be removed by hand or by
    /// `cleanup-orphans`. With only a volume tracked, the volume is deleted.
    pub async fn compensate<C, V>(
        &mut self,
        compute: &ComputeProvisioner<'_, C>,
        storage: &StorageLifecycle<'_, V>,
    ) -> Compensation
    where
        C: InstanceOperations,
        V: VolumeOperations,
    {
        if let Some(instance_id) = self.instance.clone() {
            if let Some(volume_id) = &self.volume {
                warn!(
                    instance_id = %instance_id,
                    volume_id = %volume_id,
                    "Terminating worker only; detached volume is left for cleanup-orphans"
                );
            }

            return match compute.terminate(&instance_id).await {
                Ok(()) => {
                    info!(instance_id = %instance_id, "Terminated worker during cleanup");
                    self.instance = None;
                    Compensation::TerminatedInstance {
                        stranded_volume: self.volume.take(),
                    }
                }
                Err(e) => {
                    error!(
                        instance_id = %instance_id,
                        error = %e,
                        "Failed to terminate worker during cleanup, terminate it manually"
                    );
                    Compensation::Failed
                }
            };
        }

        if let Some(volume_id) = self.volume.clone() {
            return match storage.delete(&volume_id).await {
                Ok(()) => {
                    info!(volume_id = %volume_id, "Deleted working volume during cleanup");
                    self.volume = None;
                    Compensation::DeletedVolume(volume_id)
                }
                Err(e) => {
                    error!(
                        volume_id = %volume_id,
                        error = %e,
                        "Failed to delete volume during cleanup, delete it manually"
                    );
                    Compensation::Failed
                }
            };
        }

        Compensation::Nothing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ec2::{MockInstanceOperations, MockVolumeOperations};
    use crate::wait::WaitConfig;
    use anyhow::anyhow;
    use tokio_util::sync::CancellationToken;

    fn instance() -> InstanceId {
        InstanceId::parse("i-0a1b2c3d").unwrap()
    }

    fn volume() -> VolumeId {
        VolumeId::parse("vol-0a1b2c3d").unwrap()
    }

    async fn compensate(
        guard: &mut CleanupGuard,
        compute: &MockInstanceOperations,
        volumes: &MockVolumeOperations,
    ) -> Compensation {
        let wait = WaitConfig::from_secs(0, 1, 1);
        let cancel = CancellationToken::new();
        let provisioner = ComputeProvisioner::new(compute, wait, cancel.clone());
        let storage = StorageLifecycle::new(volumes, wait, wait, cancel);
        guard.compensate(&provisioner, &storage).await
    }

    #[test]
    fn test_acquire_returns_displaced_handle() {
        let mut guard = CleanupGuard::default();
        assert!(guard.is_empty());
        assert!(guard.acquire_instance(instance()).is_none());

        let other = InstanceId::parse("i-0f0e0d0c").unwrap();
        assert_eq!(guard.acquire_instance(other.clone()), Some(instance()));
        assert_eq!(guard.instance(), Some(&other));

        assert!(guard.acquire_volume(volume()).is_none());
        assert_eq!(guard.release_volume(), Some(volume()));
        assert_eq!(guard.release_instance(), Some(other));
        assert!(guard.is_empty());
    }

    #[test]
    fn test_describe_tracked_prefers_instance() {
        let mut guard = CleanupGuard::default();
        assert!(guard.describe_tracked().is_none());

        guard.acquire_volume(volume());
        assert_eq!(guard.describe_tracked().as_deref(), Some("volume vol-0a1b2c3d"));

        guard.acquire_instance(instance());
        assert_eq!(guard.describe_tracked().as_deref(), Some("instance i-0a1b2c3d"));
    }

    #[tokio::test]
    async fn test_empty_guard_makes_no_calls() {
        // No expectations: any call panics
        let compute = MockInstanceOperations::new();
        let volumes = MockVolumeOperations::new();
        let mut guard = CleanupGuard::default();

        assert_eq!(
            compensate(&mut guard, &compute, &volumes).await,
            Compensation::Nothing
        );
    }

    #[tokio::test]
    async fn test_instance_only_is_terminated_once() {
        let mut compute = MockInstanceOperations::new();
        compute
            .expect_terminate_instance()
            .withf(|id| id == "i-0a1b2c3d")
            .times(1)
            .returning(|_| Ok(()));
        let mut volumes = MockVolumeOperations::new();
        volumes.expect_delete_volume().never();

        let mut guard = CleanupGuard::default();
        guard.acquire_instance(instance());

        let outcome = compensate(&mut guard, &compute, &volumes).await;
        assert_eq!(
            outcome,
            Compensation::TerminatedInstance {
                stranded_volume: None
            }
        );
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn test_instance_takes_precedence_over_detached_volume() {
        let mut compute = MockInstanceOperations::new();
        compute
            .expect_terminate_instance()
            .times(1)
            .returning(|_| Ok(()));
        let mut volumes = MockVolumeOperations::new();
        volumes.expect_delete_volume().never();

        let mut guard = CleanupGuard::default();
        guard.acquire_instance(instance());
        guard.acquire_volume(volume());

        let outcome = compensate(&mut guard, &compute, &volumes).await;
        assert_eq!(
            outcome,
            Compensation::TerminatedInstance {
                stranded_volume: Some(volume())
            }
        );
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn test_volume_only_is_deleted() {
        let mut compute = MockInstanceOperations::new();
        compute.expect_terminate_instance().never();
        let mut volumes = MockVolumeOperations::new();
        volumes
            .expect_delete_volume()
            .withf(|id| id == "vol-0a1b2c3d")
            .times(1)
            .returning(|_| Ok(()));

        let mut guard = CleanupGuard::default();
        guard.acquire_volume(volume());

        assert_eq!(
            compensate(&mut guard, &compute, &volumes).await,
            Compensation::DeletedVolume(volume())
        );
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn test_failed_termination_keeps_handles() {
        let mut compute = MockInstanceOperations::new();
        compute
            .expect_terminate_instance()
            .times(1)
            .returning(|_| Err(anyhow!("UnauthorizedOperation")));
        let volumes = MockVolumeOperations::new();

        let mut guard = CleanupGuard::default();
        guard.acquire_instance(instance());
        guard.acquire_volume(volume());

        assert_eq!(
            compensate(&mut guard, &compute, &volumes).await,
            Compensation::Failed
        );
        assert_eq!(guard.instance(), Some(&instance()));
        assert_eq!(guard.volume(), Some(&volume()));
    }

    #[tokio::test]
    async fn test_already_terminated_instance_counts_as_released() {
        let mut compute = MockInstanceOperations::new();
        compute
            .expect_terminate_instance()
            .times(1)
            .returning(|_| Err(anyhow!("InvalidInstanceID.NotFound")));
        let volumes = MockVolumeOperations::new();

        let mut guard = CleanupGuard::default();
        guard.acquire_instance(instance());

        compensate(&mut guard, &compute, &volumes).await;
        assert!(guard.is_empty());
    }
}
