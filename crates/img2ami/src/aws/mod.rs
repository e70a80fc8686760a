//! AWS plumbing for img2ami
//!
//! - context: shared SDK configuration (region, optional profile)
//! - ec2: the EC2 client and the provider operation traits the orchestrator
//!   is generic over
//! - error: classification of SDK errors by error code
//! - tags: tag specifications applied to every created resource
//! - cleanup: tag-based discovery and removal of orphaned resources

pub mod cleanup;
pub mod context;
pub mod ec2;
pub mod error;
pub mod tags;

pub use cleanup::{CleanupConfig, CleanupReport, TagBasedCleanup};
pub use context::AwsContext;
pub use ec2::{
    Ec2Client, ImageOperations, InstanceDetails, InstanceOperations, LaunchRequest,
    RegisterImageRequest, VolumeOperations,
};
pub use error::{AwsError, classify_anyhow_error, classify_aws_error, ignore_not_found};
pub use tags::RunTags;
