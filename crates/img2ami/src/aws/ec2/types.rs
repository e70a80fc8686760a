//! EC2 request and response types

use aws_sdk_ec2::types::{ArchitectureValues, InstanceStateName, InstanceType};
use img2ami_common::{ImageId, SnapshotId, SubnetId};

/// Parameters of the single RunInstances call that creates the worker
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub worker_ami: ImageId,
    pub instance_type: InstanceType,
    pub key_name: String,
    /// Security group name
    pub security_group: String,
    pub subnet_id: Option<SubnetId>,
    /// Base64-encoded user data
    pub user_data: Option<String>,
    /// Device name of the extra working volume
    pub device_name: String,
    pub volume_size_gib: i32,
}

/// Fields read back from DescribeInstances
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceDetails {
    pub state: Option<InstanceStateName>,
    pub public_ip: Option<String>,
    /// Volume mapped at the requested device name
    pub volume_id: Option<String>,
}

/// Parameters of RegisterImage
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterImageRequest {
    pub name: String,
    pub description: Option<String>,
    pub architecture: ArchitectureValues,
    pub root_device_name: String,
    pub snapshot_id: SnapshotId,
    pub volume_size_gib: i32,
}
