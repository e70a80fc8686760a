//! EC2 resource kinds and cleanup ordering
//!
//! Each kind knows the id prefix EC2 assigns to it and where it sits in
//! the teardown order.

use serde::Serialize;

/// Types of EC2 resources img2ami creates or references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Worker instance (terminating it detaches anything still attached)
    Instance,
    /// Working volume that receives the raw image
    Volume,
    /// Snapshot of the working volume
    Snapshot,
    /// Registered machine image
    Image,
    /// VPC subnet (user input only, never created)
    Subnet,
}

impl ResourceKind {
    /// The id prefix EC2 uses for this kind, without the trailing dash
    pub fn prefix(self) -> &'static str {
        match self {
            ResourceKind::Instance => "i",
            ResourceKind::Volume => "vol",
            ResourceKind::Snapshot => "snap",
            ResourceKind::Image => "ami",
            ResourceKind::Subnet => "subnet",
        }
    }

    /// Human readable name for logs and error messages
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Instance => "instance",
            ResourceKind::Volume => "volume",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Image => "image",
            ResourceKind::Subnet => "subnet",
        }
    }

    /// Get cleanup priority (lower number = cleanup first)
    ///
    /// - 0: Terminate the worker instance
    /// - 1: Delete detached volumes (an attached volume cannot be deleted)
    /// - 2: Delete snapshots that back no image
    /// - 3: Images and subnets are never cleaned up by img2ami
    pub fn cleanup_priority(self) -> u8 {
        match self {
            ResourceKind::Instance => 0,
            ResourceKind::Volume => 1,
            ResourceKind::Snapshot => 2,
            ResourceKind::Image | ResourceKind::Subnet => 3,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_before_volumes() {
        assert!(
            ResourceKind::Instance.cleanup_priority() < ResourceKind::Volume.cleanup_priority(),
            "Instances must be terminated before detached volumes are deleted"
        );
        assert!(ResourceKind::Volume.cleanup_priority() < ResourceKind::Snapshot.cleanup_priority());
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(ResourceKind::Instance.prefix(), "i");
        assert_eq!(ResourceKind::Volume.prefix(), "vol");
        assert_eq!(ResourceKind::Snapshot.prefix(), "snap");
        assert_eq!(ResourceKind::Image.prefix(), "ami");
        assert_eq!(ResourceKind::Subnet.prefix(), "subnet");
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceKind::Snapshot.to_string(), "snapshot");
    }
}
