//! EC2 client for worker instances, working volumes, snapshots and images

mod image;
mod instance;
mod operations;
mod types;
mod volume;

pub use operations::{ImageOperations, InstanceOperations, VolumeOperations};
pub use types::{InstanceDetails, LaunchRequest, RegisterImageRequest};

#[cfg(test)]
pub use operations::{MockImageOperations, MockInstanceOperations, MockVolumeOperations};

use crate::aws::context::AwsContext;
use crate::aws::tags::RunTags;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{ResourceType, TagSpecification};

/// EC2 client used by one run
pub struct Ec2Client {
    pub(crate) client: Client,
    tags: Option<RunTags>,
}

impl Ec2Client {
    /// Create an EC2 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
            tags: None,
        }
    }

    /// Tag every resource this client creates with the run's tags
    pub fn with_run_tags(mut self, tags: RunTags) -> Self {
        self.tags = Some(tags);
        self
    }

    fn tag_specs(&self, resources: &[(ResourceType, &str)]) -> Option<Vec<TagSpecification>> {
        self.tags.as_ref().map(|tags| {
            resources
                .iter()
                .map(|(resource_type, role)| tags.spec(resource_type.clone(), role))
                .collect()
        })
    }
}

impl std::fmt::Debug for Ec2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Client")
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
