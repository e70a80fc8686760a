//! Provider operation traits for testing
//!
//! The orchestrator is generic over these traits so the whole workflow can
//! be exercised against mocks without hitting real AWS. `Ec2Client`
//! implements all three by delegating to its inherent methods.

use super::Ec2Client;
use super::types::{InstanceDetails, LaunchRequest, RegisterImageRequest};
use anyhow::Result;
use aws_sdk_ec2::types::{InstanceStateName, SnapshotState, VolumeState};

/// Worker instance lifecycle calls
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait InstanceOperations: Send + Sync {
    /// Launch one worker, returning the raw instance id
    async fn run_instance(&self, request: &LaunchRequest) -> Result<String>;

    async fn instance_state(&self, instance_id: &str) -> Result<InstanceStateName>;

    /// Public address and the volume mapped at `device_name`
    async fn describe_instance(&self, instance_id: &str, device_name: &str)
    -> Result<InstanceDetails>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
}

/// Working volume and snapshot calls
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait VolumeOperations: Send + Sync {
    async fn detach_volume(&self, volume_id: &str) -> Result<()>;

    async fn volume_state(&self, volume_id: &str) -> Result<VolumeState>;

    /// Start a snapshot, returning the raw snapshot id
    async fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<String>;

    async fn snapshot_state(&self, snapshot_id: &str) -> Result<SnapshotState>;

    async fn delete_volume(&self, volume_id: &str) -> Result<()>;
}

/// Machine image calls
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait ImageOperations: Send + Sync {
    /// Id of an image owned by the caller with exactly this name
    async fn find_image_by_name(&self, name: &str) -> Result<Option<String>>;

    /// Register an image, returning the raw image id
    async fn register_image(&self, request: &RegisterImageRequest) -> Result<String>;
}

impl InstanceOperations for Ec2Client {
    async fn run_instance(&self, request: &LaunchRequest) -> Result<String> {
        Ec2Client::run_instance(self, request).await
    }

    async fn instance_state(&self, instance_id: &str) -> Result<InstanceStateName> {
        Ec2Client::instance_state(self, instance_id).await
    }

    async fn describe_instance(
        &self,
        instance_id: &str,
        device_name: &str,
    ) -> Result<InstanceDetails> {
        Ec2Client::describe_instance(self, instance_id, device_name).await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        Ec2Client::terminate_instance(self, instance_id).await
    }
}

impl VolumeOperations for Ec2Client {
    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        Ec2Client::detach_volume(self, volume_id).await
    }

    async fn volume_state(&self, volume_id: &str) -> Result<VolumeState> {
        Ec2Client::volume_state(self, volume_id).await
    }

    async fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<String> {
        Ec2Client::create_snapshot(self, volume_id, description).await
    }

    async fn snapshot_state(&self, snapshot_id: &str) -> Result<SnapshotState> {
        Ec2Client::snapshot_state(self, snapshot_id).await
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        Ec2Client::delete_volume(self, volume_id).await
    }
}

impl ImageOperations for Ec2Client {
    async fn find_image_by_name(&self, name: &str) -> Result<Option<String>> {
        Ec2Client::find_image_by_name(self, name).await
    }

    async fn register_image(&self, request: &RegisterImageRequest) -> Result<String> {
        Ec2Client::register_image(self, request).await
    }
}
