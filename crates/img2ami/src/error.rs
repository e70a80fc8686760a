//! Error taxonomy for a registration run
//!
//! Lower layers (EC2 calls, ssh/scp) return `anyhow::Result` with context;
//! the orchestrator folds those into [`RegistrationError`], whose variants
//! decide whether the attempt loop retries or aborts.

use crate::aws::error::classify_anyhow_error;
use crate::wait::WaitError;
use img2ami_common::InvalidHandle;
use thiserror::Error;

/// Failure of a registration run or of one of its phases
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Bad arguments, unreadable image file or malformed user-supplied id
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// An image with the target name is already registered
    #[error("image '{name}' already exists as {image_id}")]
    AlreadyExists { name: String, image_id: String },

    /// A describe call failed or its response lacked the expected field
    #[error("failed to {operation}: {error:#}")]
    ProviderQuery {
        operation: String,
        error: anyhow::Error,
    },

    /// A mutating provider call failed or returned a malformed id
    #[error("failed to {operation}: {error:#}")]
    Operation {
        operation: String,
        error: anyhow::Error,
    },

    /// A polled state never reached its target
    #[error("timed out waiting for {resource} after {polls} polls (last state: {last_state})")]
    Timeout {
        resource: String,
        polls: u32,
        last_state: String,
    },

    /// Upload or device write on the worker failed
    #[error("image {stage} failed: {error:#}")]
    Transfer {
        stage: &'static str,
        error: anyhow::Error,
    },

    /// The operator interrupted the run
    #[error("interrupted")]
    Interrupted,

    /// A resource from a failed attempt could not be released, so no new
    /// attempt is started
    #[error("could not release {resource} after a failed attempt; remove it manually")]
    CleanupIncomplete { resource: String },

    /// Every attempt failed
    #[error("no attempts succeeded after {attempts} attempt(s), last error: {last_error}")]
    NoAttemptsSucceeded { attempts: u32, last_error: String },
}

impl RegistrationError {
    /// Wrap a describe failure
    pub fn query(operation: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        Self::ProviderQuery {
            operation: operation.into(),
            error: error.into(),
        }
    }

    /// Wrap a mutation failure
    pub fn operation(operation: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        Self::Operation {
            operation: operation.into(),
            error: error.into(),
        }
    }

    /// Whether the attempt loop may start a fresh attempt after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderQuery { .. }
                | Self::Operation { .. }
                | Self::Timeout { .. }
                | Self::Transfer { .. }
        )
    }

    /// Hint for resolving a provider failure, when one is known
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ProviderQuery { error, .. } | Self::Operation { error, .. } => {
                classify_anyhow_error(error).suggestion()
            }
            _ => None,
        }
    }

    /// Whether this is a usage or validation error (exit code 2)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<WaitError> for RegistrationError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout {
                resource,
                polls,
                last_state,
            } => Self::Timeout {
                resource,
                polls,
                last_state,
            },
            WaitError::Query { resource, error } => Self::ProviderQuery {
                operation: format!("query {resource}"),
                error,
            },
            WaitError::Cancelled { .. } => Self::Interrupted,
        }
    }
}

impl From<InvalidHandle> for RegistrationError {
    fn from(err: InvalidHandle) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use img2ami_common::ResourceKind;

    #[test]
    fn test_retryable_variants() {
        assert!(RegistrationError::query("describe volume", anyhow::anyhow!("boom")).is_retryable());
        assert!(RegistrationError::operation("detach volume", anyhow::anyhow!("boom")).is_retryable());
        assert!(
            RegistrationError::Timeout {
                resource: "snapshot".into(),
                polls: 75,
                last_state: "Pending".into()
            }
            .is_retryable()
        );
        assert!(
            RegistrationError::Transfer {
                stage: "upload",
                error: anyhow::anyhow!("scp exited with 1")
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_fatal_variants() {
        assert!(!RegistrationError::Validation("bad".into()).is_retryable());
        assert!(
            !RegistrationError::AlreadyExists {
                name: "img".into(),
                image_id: "ami-0a1b2c3d".into()
            }
            .is_retryable()
        );
        assert!(!RegistrationError::Interrupted.is_retryable());
        assert!(
            !RegistrationError::CleanupIncomplete {
                resource: "instance i-0a1b2c3d".into()
            }
            .is_retryable()
        );
        assert!(
            !RegistrationError::NoAttemptsSucceeded {
                attempts: 2,
                last_error: "x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_wait_errors_map_to_taxonomy() {
        let timeout = RegistrationError::from(WaitError::Timeout {
            resource: "volume vol-0a1b2c3d available".into(),
            polls: 20,
            last_state: "InUse".into(),
        });
        assert!(matches!(timeout, RegistrationError::Timeout { polls: 20, .. }));

        let query = RegistrationError::from(WaitError::Query {
            resource: "instance i-0a1b2c3d running".into(),
            error: anyhow::anyhow!("InvalidInstanceID.NotFound"),
        });
        assert!(matches!(query, RegistrationError::ProviderQuery { .. }));

        let cancelled = RegistrationError::from(WaitError::Cancelled {
            resource: "snapshot".into(),
        });
        assert!(matches!(cancelled, RegistrationError::Interrupted));
    }

    #[test]
    fn test_provider_failures_carry_hints() {
        let err = RegistrationError::operation(
            "launch worker instance",
            anyhow::anyhow!("InsufficientInstanceCapacity: no capacity in us-east-2a"),
        );
        assert!(err.suggestion().unwrap().contains("--subnet-id"));

        let err = RegistrationError::query("look up image", anyhow::anyhow!("boom"));
        assert!(err.suggestion().is_none());
        assert!(RegistrationError::Interrupted.suggestion().is_none());
    }

    #[test]
    fn test_invalid_user_handle_is_validation() {
        let err = RegistrationError::from(InvalidHandle {
            kind: ResourceKind::Subnet,
            id: "subnet-zz".into(),
        });
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "invalid configuration: malformed subnet id: 'subnet-zz'"
        );
    }
}
