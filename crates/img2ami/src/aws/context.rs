//! Shared AWS configuration context
//!
//! Loads the SDK configuration once per run; every EC2 client of the run is
//! built from it.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::sync::Arc;

/// Loaded AWS SDK configuration for one region.
///
/// # Example
/// ```ignore
/// let aws = AwsContext::new("us-east-2", None).await;
/// let ec2 = Ec2Client::from_context(&aws);
/// ```
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
    profile: Option<String>,
}

impl AwsContext {
    /// Load AWS configuration for `region`.
    ///
    /// Credentials come from the default provider chain; `profile` selects a
    /// named profile from the shared config files.
    pub async fn new(region: &str, profile: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Self {
            config: Arc::new(config),
            region: region.to_string(),
            profile: profile.map(str::to_string),
        }
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Create an EC2 client from this context.
    pub fn ec2_client(&self) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::new(self.sdk_config())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_context_keeps_region_and_profile() {
        let ctx = AwsContext::new("us-east-2", None).await;
        assert_eq!(ctx.region(), "us-east-2");
        assert!(ctx.profile().is_none());
    }
}
