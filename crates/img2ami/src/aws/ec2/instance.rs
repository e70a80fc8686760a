//! Worker instance lifecycle operations

use super::Ec2Client;
use super::types::{InstanceDetails, LaunchRequest};
use crate::aws::error::{AwsError, classify_anyhow_error};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Instance, InstanceStateName, ResourceType, VolumeType,
};
use backon::{ExponentialBuilder, Retryable};
use img2ami_common::defaults::VOLUME_TYPE;
use std::time::Duration;
use tracing::{debug, info, warn};

fn is_throttled(e: &anyhow::Error) -> bool {
    matches!(classify_anyhow_error(e), AwsError::Throttled)
}

impl Ec2Client {
    /// Launch the worker instance.
    ///
    /// Rate limiting is retried with exponential backoff; any other failure
    /// is returned to the caller.
    pub async fn run_instance(&self, request: &LaunchRequest) -> Result<String> {
        info!(
            worker_ami = %request.worker_ami,
            instance_type = %request.instance_type,
            volume_size_gib = request.volume_size_gib,
            device = %request.device_name,
            "Launching worker instance"
        );

        (|| self.do_run_instance(request))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(2))
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(5),
            )
            .when(is_throttled)
            .notify(|e, dur| {
                warn!(delay = ?dur, error = %e, "AWS rate limited, backing off...");
            })
            .await
    }

    async fn do_run_instance(&self, request: &LaunchRequest) -> Result<String> {
        let response = self
            .client
            .run_instances()
            .image_id(request.worker_ami.as_str())
            .instance_type(request.instance_type.clone())
            .min_count(1)
            .max_count(1)
            .key_name(&request.key_name)
            .security_groups(&request.security_group)
            .set_subnet_id(request.subnet_id.as_ref().map(|s| s.to_string()))
            .set_user_data(request.user_data.clone())
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(&request.device_name)
                    .ebs(
                        EbsBlockDevice::builder()
                            .volume_size(request.volume_size_gib)
                            .volume_type(VolumeType::from(VOLUME_TYPE))
                            .delete_on_termination(false)
                            .build(),
                    )
                    .build(),
            )
            .set_tag_specifications(self.tag_specs(&[
                (ResourceType::Instance, "worker"),
                (ResourceType::Volume, "volume"),
            ]))
            .send()
            .await
            .context("Failed to launch worker instance")?;

        let instance_id = response
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .context("RunInstances returned no instance id")?
            .to_string();

        info!(instance_id = %instance_id, "Worker instance launched");
        Ok(instance_id)
    }

    async fn describe_one(&self, instance_id: &str) -> Result<Instance> {
        let response = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .with_context(|| format!("Failed to describe instance {instance_id}"))?;

        response
            .reservations()
            .first()
            .and_then(|r| r.instances().first())
            .cloned()
            .with_context(|| format!("Instance {instance_id} missing from DescribeInstances"))
    }

    /// Current lifecycle state of an instance
    pub async fn instance_state(&self, instance_id: &str) -> Result<InstanceStateName> {
        let instance = self.describe_one(instance_id).await?;
        instance
            .state()
            .and_then(|s| s.name())
            .cloned()
            .with_context(|| format!("Instance {instance_id} has no state"))
    }

    /// Public address and the volume attached at `device_name`
    pub async fn describe_instance(
        &self,
        instance_id: &str,
        device_name: &str,
    ) -> Result<InstanceDetails> {
        let instance = self.describe_one(instance_id).await?;
        let details = instance_details(&instance, device_name);
        debug!(instance_id = %instance_id, details = ?details, "Described instance");
        Ok(details)
    }

    /// Terminate an instance
    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Terminating instance");

        self.client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .with_context(|| format!("Failed to terminate instance {instance_id}"))?;

        Ok(())
    }
}

/// Pull the fields the workflow needs out of a described instance
fn instance_details(instance: &Instance, device_name: &str) -> InstanceDetails {
    InstanceDetails {
        state: instance.state().and_then(|s| s.name()).cloned(),
        public_ip: instance.public_ip_address().map(str::to_string),
        volume_id: instance
            .block_device_mappings()
            .iter()
            .find(|m| m.device_name() == Some(device_name))
            .and_then(|m| m.ebs())
            .and_then(|ebs| ebs.volume_id())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{EbsInstanceBlockDevice, InstanceBlockDeviceMapping, InstanceState};

    fn mapping(device: &str, volume: &str) -> InstanceBlockDeviceMapping {
        InstanceBlockDeviceMapping::builder()
            .device_name(device)
            .ebs(EbsInstanceBlockDevice::builder().volume_id(volume).build())
            .build()
    }

    #[test]
    fn test_details_pick_volume_at_requested_device() {
        let instance = Instance::builder()
            .state(
                InstanceState::builder()
                    .name(InstanceStateName::Running)
                    .build(),
            )
            .public_ip_address("203.0.113.7")
            .block_device_mappings(mapping("/dev/xvda", "vol-00000000"))
            .block_device_mappings(mapping("/dev/xvdf", "vol-0a1b2c3d"))
            .build();

        let details = instance_details(&instance, "/dev/xvdf");
        assert_eq!(details.state, Some(InstanceStateName::Running));
        assert_eq!(details.public_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(details.volume_id.as_deref(), Some("vol-0a1b2c3d"));
    }

    #[test]
    fn test_details_missing_fields_are_none() {
        let instance = Instance::builder()
            .block_device_mappings(mapping("/dev/xvda", "vol-00000000"))
            .build();

        let details = instance_details(&instance, "/dev/xvdf");
        assert_eq!(details, InstanceDetails::default());
    }

    #[test]
    fn test_throttling_is_detected_from_message() {
        assert!(is_throttled(&anyhow::anyhow!("RequestLimitExceeded: slow down")));
        assert!(!is_throttled(&anyhow::anyhow!("InvalidKeyPair.NotFound")));
    }
}
