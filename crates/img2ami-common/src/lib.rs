//! img2ami-common - Shared types and utilities
//!
//! This crate holds the pieces of img2ami that do not need the AWS SDK:
//! resource identifiers and their validation, default budgets, tag keys
//! and image size arithmetic.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values and poll budgets
//! - [`handle`]: Typed, validated EC2 resource identifiers
//! - [`resource_kind`]: Resource kinds and cleanup ordering
//! - [`size`]: Image size rounding to whole GiB
//! - [`tags`]: AWS resource tag constants for discovery and cleanup

pub mod defaults;
pub mod handle;
pub mod resource_kind;
pub mod size;
pub mod tags;

// Re-export commonly used types
pub use handle::{
    ImageId, InstanceId, InvalidHandle, ResourceHandle, SnapshotId, SubnetId, VolumeId, validate,
};
pub use resource_kind::ResourceKind;
pub use size::{GIB, image_size_gib};
