//! Run configuration
//!
//! CLI arguments are converted into a [`RunConfig`] made of focused
//! sub-configs. [`RunConfig::validate`] checks everything that can be checked
//! locally and produces a [`RunPlan`] with the parsed ids and the resolved
//! volume size; nothing talks to AWS before validation succeeds.

use crate::aws::ec2::{LaunchRequest, RegisterImageRequest};
use crate::error::RegistrationError;
use crate::wait::WaitConfig;
use aws_sdk_ec2::types::{ArchitectureValues, InstanceType};
use base64::Engine;
use img2ami_common::defaults::*;
use img2ami_common::tags::TAG_TOOL_VALUE;
use img2ami_common::{GIB, ImageId, SnapshotId, SubnetId, image_size_gib};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest gp2 volume, in GiB
const MAX_VOLUME_SIZE_GIB: u64 = 16384;

/// Image being registered
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Local raw disk image
    pub path: PathBuf,
    /// Name of the registered image (unique per account and region)
    pub name: String,
    pub description: Option<String>,
    /// Architecture of the registered image (e.g. "x86_64", "arm64")
    pub architecture: String,
    pub root_device_name: String,
    /// Volume size override in GiB; defaults to the image size rounded up
    pub volume_size_gib: Option<u64>,
}

/// AWS account settings
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub aws_profile: Option<String>,
}

/// Worker instance settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub ami: String,
    pub instance_type: String,
    pub key_name: String,
    /// Security group name
    pub security_group: String,
    pub subnet_id: Option<String>,
    /// Base64-encoded user data
    pub user_data: Option<String>,
}

/// ssh/scp settings
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Private key; defaults to `~/.ssh/<key-name>.pem`
    pub ssh_key: Option<PathBuf>,
    pub ssh_user: String,
    /// Device name of the working volume on the worker
    pub device_name: String,
    pub connect_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ssh_key: None,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            connect_timeout_secs: DEFAULT_SSH_CONNECT_TIMEOUT_SECS,
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT_SECS,
        }
    }
}

/// Poll budgets of every wait in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudgets {
    pub instance_running: WaitConfig,
    pub device_ready: WaitConfig,
    pub volume_available: WaitConfig,
    pub snapshot_completed: WaitConfig,
    pub image_visible: WaitConfig,
}

impl Default for WaitBudgets {
    fn default() -> Self {
        Self {
            instance_running: WaitConfig::from_secs(
                INSTANCE_RUNNING_INITIAL_DELAY_SECS,
                INSTANCE_RUNNING_POLL_DELAY_SECS,
                INSTANCE_RUNNING_MAX_POLLS,
            ),
            device_ready: WaitConfig::from_secs(
                DEVICE_READY_INITIAL_DELAY_SECS,
                DEVICE_READY_POLL_DELAY_SECS,
                DEVICE_READY_MAX_POLLS,
            ),
            volume_available: WaitConfig::from_secs(
                VOLUME_AVAILABLE_INITIAL_DELAY_SECS,
                VOLUME_AVAILABLE_POLL_DELAY_SECS,
                VOLUME_AVAILABLE_MAX_POLLS,
            ),
            snapshot_completed: WaitConfig::from_secs(
                SNAPSHOT_COMPLETED_INITIAL_DELAY_SECS,
                SNAPSHOT_COMPLETED_POLL_DELAY_SECS,
                SNAPSHOT_COMPLETED_MAX_POLLS,
            ),
            image_visible: WaitConfig::from_secs(
                IMAGE_VISIBLE_INITIAL_DELAY_SECS,
                IMAGE_VISIBLE_POLL_DELAY_SECS,
                IMAGE_VISIBLE_MAX_POLLS,
            ),
        }
    }
}

/// Runtime behavior flags
#[derive(Debug, Clone)]
pub struct RuntimeFlags {
    /// Full attempts before giving up
    pub max_attempts: u32,
    /// Validate and run the preflight check only
    pub dry_run: bool,
    /// Write the JSON report here
    pub output: Option<PathBuf>,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            dry_run: false,
            output: None,
        }
    }
}

/// Configuration for a registration run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub image: ImageConfig,
    pub aws: AwsConfig,
    pub worker: WorkerConfig,
    pub transfer: TransferConfig,
    pub budgets: WaitBudgets,
    pub flags: RuntimeFlags,
}

/// A validated run, ready to execute
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Unique id of this invocation, used in tags
    pub run_id: String,
    pub config: RunConfig,
    pub worker_ami: ImageId,
    pub subnet_id: Option<SubnetId>,
    pub instance_type: InstanceType,
    pub architecture: ArchitectureValues,
    pub volume_size_gib: i32,
    pub ssh_key: PathBuf,
}

fn invalid(msg: impl Into<String>) -> RegistrationError {
    RegistrationError::Validation(msg.into())
}

impl RunConfig {
    /// Check the configuration locally and resolve derived values.
    pub fn validate(self) -> Result<RunPlan, RegistrationError> {
        let image_bytes = check_image_file(&self.image.path)?;
        let volume_size_gib = resolve_volume_size(image_bytes, self.image.volume_size_gib)?;

        check_image_name(&self.image.name)?;

        let worker_ami = ImageId::parse(self.worker.ami.as_str())?;
        let subnet_id = self
            .worker
            .subnet_id
            .as_deref()
            .map(|id| SubnetId::parse(id))
            .transpose()?;

        let architecture = parse_architecture(&self.image.architecture)?;

        let instance_type = InstanceType::from(self.worker.instance_type.as_str());
        if matches!(instance_type, InstanceType::Unknown(_)) {
            return Err(invalid(format!(
                "unknown instance type '{}'",
                self.worker.instance_type
            )));
        }

        if self.worker.key_name.trim().is_empty() {
            return Err(invalid("key name must not be empty"));
        }
        if self.worker.security_group.trim().is_empty() {
            return Err(invalid("security group name must not be empty"));
        }

        if let Some(user_data) = &self.worker.user_data {
            base64::engine::general_purpose::STANDARD
                .decode(user_data)
                .map_err(|e| invalid(format!("user data is not valid base64: {e}")))?;
        }

        check_device_name("root device name", &self.image.root_device_name)?;
        check_device_name("device name", &self.transfer.device_name)?;

        if self.transfer.ssh_user.trim().is_empty() {
            return Err(invalid("ssh user must not be empty"));
        }
        let ssh_key = match &self.transfer.ssh_key {
            Some(path) => path.clone(),
            None => default_ssh_key(&self.worker.key_name)?,
        };
        if !ssh_key.is_file() {
            return Err(invalid(format!(
                "ssh key {} does not exist",
                ssh_key.display()
            )));
        }

        if self.flags.max_attempts == 0 {
            return Err(invalid("max attempts must be at least 1"));
        }

        Ok(RunPlan {
            run_id: uuid::Uuid::new_v4().to_string(),
            config: self,
            worker_ami,
            subnet_id,
            instance_type,
            architecture,
            volume_size_gib,
            ssh_key,
        })
    }
}

impl RunPlan {
    pub fn image_name(&self) -> &str {
        &self.config.image.name
    }

    pub fn image_path(&self) -> &Path {
        &self.config.image.path
    }

    pub fn device_name(&self) -> &str {
        &self.config.transfer.device_name
    }

    pub fn budgets(&self) -> &WaitBudgets {
        &self.config.budgets
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.flags.max_attempts
    }

    pub fn dry_run(&self) -> bool {
        self.config.flags.dry_run
    }

    pub fn output(&self) -> Option<&Path> {
        self.config.flags.output.as_deref()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.transfer.connect_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.config.transfer.transfer_timeout_secs)
    }

    /// RunInstances parameters for the worker
    pub fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            worker_ami: self.worker_ami.clone(),
            instance_type: self.instance_type.clone(),
            key_name: self.config.worker.key_name.clone(),
            security_group: self.config.worker.security_group.clone(),
            subnet_id: self.subnet_id.clone(),
            user_data: self.config.worker.user_data.clone(),
            device_name: self.config.transfer.device_name.clone(),
            volume_size_gib: self.volume_size_gib,
        }
    }

    pub fn snapshot_description(&self) -> String {
        format!("{} snapshot for {}", TAG_TOOL_VALUE, self.image_name())
    }

    /// RegisterImage parameters for a completed snapshot
    pub fn register_request(&self, snapshot_id: SnapshotId) -> RegisterImageRequest {
        RegisterImageRequest {
            name: self.config.image.name.clone(),
            description: self.config.image.description.clone(),
            architecture: self.architecture.clone(),
            root_device_name: self.config.image.root_device_name.clone(),
            snapshot_id,
            volume_size_gib: self.volume_size_gib,
        }
    }
}

/// Size of a readable regular file, in bytes
fn check_image_file(path: &Path) -> Result<u64, RegistrationError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| invalid(format!("cannot read image {}: {e}", path.display())))?;
    if !metadata.is_file() {
        return Err(invalid(format!("image {} is not a file", path.display())));
    }
    std::fs::File::open(path)
        .map_err(|e| invalid(format!("cannot read image {}: {e}", path.display())))?;
    Ok(metadata.len())
}

fn resolve_volume_size(image_bytes: u64, requested: Option<u64>) -> Result<i32, RegistrationError> {
    let needed = image_size_gib(image_bytes);
    let size = match requested {
        Some(size) if size.saturating_mul(GIB) < image_bytes => {
            return Err(invalid(format!(
                "volume size {size} GiB is smaller than the image ({needed} GiB)"
            )));
        }
        Some(size) => size,
        None => needed,
    };
    if size == 0 || size > MAX_VOLUME_SIZE_GIB {
        return Err(invalid(format!(
            "volume size must be between 1 and {MAX_VOLUME_SIZE_GIB} GiB, got {size}"
        )));
    }
    i32::try_from(size).map_err(|_| invalid(format!("volume size {size} GiB out of range")))
}

/// AMI names: 3 to 128 characters of letters, digits and `()[] ./-'@_`
fn check_image_name(name: &str) -> Result<(), RegistrationError> {
    let len = name.chars().count();
    if !(3..=128).contains(&len) {
        return Err(invalid(format!(
            "image name must be 3 to 128 characters, got {len}"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "()[] ./-'@_".contains(*c)))
    {
        return Err(invalid(format!(
            "image name contains invalid character '{c}'"
        )));
    }
    Ok(())
}

fn parse_architecture(arch: &str) -> Result<ArchitectureValues, RegistrationError> {
    if ArchitectureValues::values().contains(&arch) {
        Ok(ArchitectureValues::from(arch))
    } else {
        Err(invalid(format!(
            "unsupported architecture '{arch}' (expected one of: {})",
            ArchitectureValues::values().join(", ")
        )))
    }
}

fn check_device_name(what: &str, device: &str) -> Result<(), RegistrationError> {
    let valid = device
        .strip_prefix("/dev/")
        .is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '/')
        });
    if valid {
        Ok(())
    } else {
        Err(invalid(format!("{what} '{device}' is not a /dev path")))
    }
}

fn default_ssh_key(key_name: &str) -> Result<PathBuf, RegistrationError> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| invalid("cannot determine home directory, pass --ssh-key"))?;
    Ok(dirs
        .home_dir()
        .join(".ssh")
        .join(format!("{key_name}.pem")))
}
