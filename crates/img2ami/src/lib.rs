//! img2ami - register raw disk images as EC2 machine images
//!
//! A run launches a short-lived worker instance with an extra EBS volume,
//! copies the raw image onto that volume over SSH, snapshots the volume and
//! registers the snapshot as an AMI. Every ephemeral resource is tracked by a
//! cleanup guard so failed or interrupted runs do not leak billable resources.

pub mod aws;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod transfer;
pub mod wait;

pub use error::RegistrationError;
