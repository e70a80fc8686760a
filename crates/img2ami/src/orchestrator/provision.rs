//! Worker instance provisioning

use crate::aws::error::ignore_not_found;
use crate::aws::{InstanceOperations, LaunchRequest};
use crate::error::RegistrationError;
use crate::wait::{WaitConfig, wait_until};
use anyhow::anyhow;
use aws_sdk_ec2::types::InstanceStateName;
use img2ami_common::{InstanceId, VolumeId};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running worker with its working volume attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInstance {
    pub id: InstanceId,
    pub public_address: String,
    pub volume_id: VolumeId,
}

/// Launches, observes and terminates the worker instance
pub struct ComputeProvisioner<'a, C> {
    ops: &'a C,
    running: WaitConfig,
    cancel: CancellationToken,
}

impl<'a, C: InstanceOperations> ComputeProvisioner<'a, C> {
    pub fn new(ops: &'a C, running: WaitConfig, cancel: CancellationToken) -> Self {
        Self {
            ops,
            running,
            cancel,
        }
    }

    /// Launch the worker; a missing or malformed id is a launch failure
    pub async fn launch(&self, request: &LaunchRequest) -> Result<InstanceId, RegistrationError> {
        let raw = self
            .ops
            .run_instance(request)
            .await
            .map_err(|e| RegistrationError::operation("launch worker instance", e))?;

        InstanceId::parse(raw).map_err(|e| RegistrationError::operation("launch worker instance", e))
    }

    /// Wait until the instance is running.
    ///
    /// An instance that is already shutting down or terminated will never
    /// get there, so that ends the wait early as a query failure.
    pub async fn await_running(&self, instance_id: &InstanceId) -> Result<(), RegistrationError> {
        wait_until(
            &self.running,
            Some(&self.cancel),
            &format!("instance {instance_id} running"),
            || async {
                let state = self.ops.instance_state(instance_id.as_str()).await?;
                if matches!(
                    state,
                    InstanceStateName::ShuttingDown | InstanceStateName::Terminated
                ) {
                    return Err(anyhow!("instance {instance_id} entered state {state}"));
                }
                Ok(state)
            },
            |state| *state == InstanceStateName::Running,
        )
        .await?;

        info!(instance_id = %instance_id, "Worker is running");
        Ok(())
    }

    /// Read the public address and the working volume of a running worker
    pub async fn describe(
        &self,
        instance_id: &InstanceId,
        device_name: &str,
    ) -> Result<WorkerInstance, RegistrationError> {
        let operation = format!("describe instance {instance_id}");
        let details = self
            .ops
            .describe_instance(instance_id.as_str(), device_name)
            .await
            .map_err(|e| RegistrationError::query(operation.as_str(), e))?;

        let public_address = details.public_ip.ok_or_else(|| {
            RegistrationError::query(operation.as_str(), anyhow!("instance has no public address"))
        })?;
        let raw_volume = details.volume_id.ok_or_else(|| {
            RegistrationError::query(
                operation.as_str(),
                anyhow!("no volume attached at {device_name}"),
            )
        })?;
        let volume_id =
            VolumeId::parse(raw_volume).map_err(|e| RegistrationError::query(operation.as_str(), e))?;

        info!(
            instance_id = %instance_id,
            public_address = %public_address,
            volume_id = %volume_id,
            "Described worker"
        );

        Ok(WorkerInstance {
            id: instance_id.clone(),
            public_address,
            volume_id,
        })
    }

    /// Terminate the worker. An instance that no longer exists counts as terminated.
    pub async fn terminate(&self, instance_id: &InstanceId) -> Result<(), RegistrationError> {
        ignore_not_found(self.ops.terminate_instance(instance_id.as_str()).await)
            .map_err(|e| RegistrationError::operation(format!("terminate instance {instance_id}"), e))
    }
}
