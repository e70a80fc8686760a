//! Default configuration values shared across img2ami
//!
//! Poll budgets are expressed as (initial delay, delay between polls,
//! maximum number of polls). Snapshot completion gets the largest budget
//! since it is the slowest asynchronous step.

/// Default number of full attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default security group name for the worker
pub const DEFAULT_SECURITY_GROUP: &str = "default";

/// Default root device name of the registered image
pub const DEFAULT_ROOT_DEVICE_NAME: &str = "/dev/xvda";

/// Default device name for the extra working volume on the worker
pub const DEFAULT_DEVICE_NAME: &str = "/dev/xvdf";

/// Default login user on the worker
pub const DEFAULT_SSH_USER: &str = "ec2-user";

/// Default SSH connect timeout in seconds
pub const DEFAULT_SSH_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Upper bound for the image upload and device write (2 hours)
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 7200;

/// Where the image is staged on the worker before the device write
pub const REMOTE_IMAGE_PATH: &str = "/tmp/img2ami-upload.img";

/// Virtualization type of registered images
pub const VIRTUALIZATION_TYPE: &str = "hvm";

/// EBS volume type for the working volume and the image mapping
pub const VOLUME_TYPE: &str = "gp2";

/// SR-IOV setting of registered images
pub const SRIOV_NET_SUPPORT: &str = "simple";

/// Instance reaching "running"
pub const INSTANCE_RUNNING_INITIAL_DELAY_SECS: u64 = 20;
pub const INSTANCE_RUNNING_POLL_DELAY_SECS: u64 = 6;
pub const INSTANCE_RUNNING_MAX_POLLS: u32 = 10;

/// Target block device visible over SSH
pub const DEVICE_READY_INITIAL_DELAY_SECS: u64 = 30;
pub const DEVICE_READY_POLL_DELAY_SECS: u64 = 6;
pub const DEVICE_READY_MAX_POLLS: u32 = 10;

/// Volume reaching "available" after detach
pub const VOLUME_AVAILABLE_INITIAL_DELAY_SECS: u64 = 20;
pub const VOLUME_AVAILABLE_POLL_DELAY_SECS: u64 = 6;
pub const VOLUME_AVAILABLE_MAX_POLLS: u32 = 20;

/// Snapshot reaching "completed"
pub const SNAPSHOT_COMPLETED_INITIAL_DELAY_SECS: u64 = 20;
pub const SNAPSHOT_COMPLETED_POLL_DELAY_SECS: u64 = 10;
pub const SNAPSHOT_COMPLETED_MAX_POLLS: u32 = 75;

/// Registered image showing up in DescribeImages
pub const IMAGE_VISIBLE_INITIAL_DELAY_SECS: u64 = 0;
pub const IMAGE_VISIBLE_POLL_DELAY_SECS: u64 = 10;
pub const IMAGE_VISIBLE_MAX_POLLS: u32 = 20;

/// Default minimum age before a tagged resource is considered orphaned
pub const DEFAULT_ORPHAN_MIN_AGE_HOURS: u64 = 1;
