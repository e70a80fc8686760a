//! Machine image lookup and registration

use super::Ec2Client;
use super::types::RegisterImageRequest;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{BlockDeviceMapping, EbsBlockDevice, Filter, VolumeType};
use img2ami_common::defaults::{SRIOV_NET_SUPPORT, VIRTUALIZATION_TYPE, VOLUME_TYPE};
use tracing::{debug, info};

impl Ec2Client {
    /// Find an image owned by this account with exactly `name`
    pub async fn find_image_by_name(&self, name: &str) -> Result<Option<String>> {
        let response = self
            .client
            .describe_images()
            .owners("self")
            .filters(Filter::builder().name("name").values(name).build())
            .send()
            .await
            .with_context(|| format!("Failed to look up image '{name}'"))?;

        let image_id = response
            .images()
            .first()
            .and_then(|img| img.image_id())
            .map(str::to_string);

        debug!(name = %name, image_id = ?image_id, "Looked up image by name");
        Ok(image_id)
    }

    /// Register an image backed by a completed snapshot
    pub async fn register_image(&self, request: &RegisterImageRequest) -> Result<String> {
        info!(
            name = %request.name,
            snapshot_id = %request.snapshot_id,
            architecture = %request.architecture,
            "Registering image"
        );

        let response = self
            .client
            .register_image()
            .name(&request.name)
            .set_description(request.description.clone())
            .architecture(request.architecture.clone())
            .root_device_name(&request.root_device_name)
            .virtualization_type(VIRTUALIZATION_TYPE)
            .sriov_net_support(SRIOV_NET_SUPPORT)
            .ena_support(true)
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(&request.root_device_name)
                    .ebs(
                        EbsBlockDevice::builder()
                            .snapshot_id(request.snapshot_id.as_str())
                            .volume_size(request.volume_size_gib)
                            .volume_type(VolumeType::from(VOLUME_TYPE))
                            .delete_on_termination(true)
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("Failed to register image '{}'", request.name))?;

        let image_id = response
            .image_id()
            .context("RegisterImage returned no image id")?
            .to_string();

        info!(image_id = %image_id, "Image registered");
        Ok(image_id)
    }
}
