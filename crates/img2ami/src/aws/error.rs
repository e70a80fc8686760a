//! AWS error classification
//!
//! Errors are classified by the SDK error code (`ProvideErrorMetadata`)
//! rather than by matching on Debug output; the Debug fallback only applies
//! when no typed SDK error is found in the chain.

use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::operation::{
    create_snapshot::CreateSnapshotError, delete_volume::DeleteVolumeError,
    describe_images::DescribeImagesError, describe_instances::DescribeInstancesError,
    describe_snapshots::DescribeSnapshotsError, describe_volumes::DescribeVolumesError,
    detach_volume::DetachVolumeError, register_image::RegisterImageError,
    run_instances::RunInstancesError, terminate_instances::TerminateInstancesError,
};
use thiserror::Error;

/// AWS error categories for retry and cleanup logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource does not exist (already gone, safe to skip in cleanup)
    #[error("Resource not found: {message}")]
    NotFound { code: String, message: String },

    /// An image with the requested name is already registered
    #[error("Image name already in use")]
    DuplicateName,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource is in a state that does not allow the call yet
    #[error("Resource busy: {message}")]
    IncorrectState { message: String },

    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled | AwsError::IncorrectState { .. })
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            AwsError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            AwsError::Throttled => suggestion_for_code("RequestLimitExceeded"),
            _ => None,
        }
    }
}

/// Error codes meaning the resource is already gone
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidVolume.NotFound",
    "InvalidSnapshot.NotFound",
    "InvalidAMIID.NotFound",
];

const DUPLICATE_CODES: &[&str] = &["InvalidAMIName.Duplicate"];

const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Volume still attached or detaching, instance not yet in a valid state
const INCORRECT_STATE_CODES: &[&str] = &[
    "IncorrectState",
    "IncorrectInstanceState",
    "VolumeInUse",
];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            code: c.to_string(),
            message,
        },
        Some(c) if DUPLICATE_CODES.contains(&c) => AwsError::DuplicateName,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if INCORRECT_STATE_CODES.contains(&c) => AwsError::IncorrectState { message },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify one link of an error chain if it is an EC2 SDK error for `E`
fn classify_sdk_cause<E>(cause: &(dyn std::error::Error + 'static)) -> Option<AwsError>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    cause.downcast_ref::<SdkError<E>>().map(|e| {
        let meta = ProvideErrorMetadata::meta(e);
        classify_aws_error(meta.code(), meta.message())
    })
}

/// Classify an `anyhow::Error` by walking its chain for an EC2 SDK error.
///
/// Falls back to scanning the Debug representation for a known error code.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    for cause in error.chain() {
        let classified = classify_sdk_cause::<RunInstancesError>(cause)
            .or_else(|| classify_sdk_cause::<DescribeInstancesError>(cause))
            .or_else(|| classify_sdk_cause::<TerminateInstancesError>(cause))
            .or_else(|| classify_sdk_cause::<DetachVolumeError>(cause))
            .or_else(|| classify_sdk_cause::<DescribeVolumesError>(cause))
            .or_else(|| classify_sdk_cause::<DeleteVolumeError>(cause))
            .or_else(|| classify_sdk_cause::<CreateSnapshotError>(cause))
            .or_else(|| classify_sdk_cause::<DescribeSnapshotsError>(cause))
            .or_else(|| classify_sdk_cause::<DescribeImagesError>(cause))
            .or_else(|| classify_sdk_cause::<RegisterImageError>(cause));
        if let Some(classified) = classified {
            return classified;
        }
    }

    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&error.to_string()));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Turn a "not found" error into success.
///
/// Used by idempotent teardown calls: a resource that no longer exists does
/// not need to be terminated or deleted.
pub fn ignore_not_found(result: anyhow::Result<()>) -> anyhow::Result<()> {
    match result {
        Err(e) if classify_anyhow_error(&e).is_not_found() => Ok(()),
        other => other,
    }
}

/// Every code the Debug fallback recognizes
const ALL_KNOWN_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidVolume.NotFound",
    "InvalidSnapshot.NotFound",
    "InvalidAMIID.NotFound",
    "InvalidAMIName.Duplicate",
    "ThrottlingException",
    "Throttling",
    "RequestLimitExceeded",
    "IncorrectInstanceState",
    "IncorrectState",
    "VolumeInUse",
    "InsufficientInstanceCapacity",
    "InstanceLimitExceeded",
    "VcpuLimitExceeded",
    "InvalidKeyPair.NotFound",
    "InvalidGroup.NotFound",
    "Unsupported",
];

/// Extract an AWS error code from a Debug string
fn extract_error_code(debug_str: &str) -> Option<String> {
    if let Some(code) = ALL_KNOWN_CODES.iter().find(|code| debug_str.contains(*code)) {
        return Some((*code).to_string());
    }

    // `code: Some("...")` as printed by ErrorMetadata
    let start = debug_str.find("code: Some(\"")?;
    let rest = &debug_str[start + 12..];
    rest.find('"').map(|end| rest[..end].to_string())
}

const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "InsufficientInstanceCapacity",
        "Try a different availability zone (--subnet-id) or worker instance type.",
    ),
    (
        "InstanceLimitExceeded",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
    (
        "VcpuLimitExceeded",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
    (
        "InvalidKeyPair.NotFound",
        "Check that --key-name names a key pair that exists in this region.",
    ),
    (
        "InvalidGroup.NotFound",
        "Check that --security-group names a security group in the target VPC.",
    ),
    (
        "Unsupported",
        "This instance type may not be available in this region/AZ.",
    ),
    (
        "RequestLimitExceeded",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
];

fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
