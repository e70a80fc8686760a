//! Image lookup, registration and visibility

use crate::aws::error::{AwsError, classify_anyhow_error};
use crate::aws::{ImageOperations, RegisterImageRequest};
use crate::error::RegistrationError;
use crate::wait::{WaitConfig, wait_until};
use img2ami_common::{ImageId, SnapshotId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredImage {
    pub image_id: ImageId,
    pub snapshot_id: SnapshotId,
    /// Whether the image showed up in DescribeImages within the budget
    pub visible: bool,
}

pub struct ImageRegistrar<'a, I> {
    ops: &'a I,
    visible: WaitConfig,
    cancel: CancellationToken,
}

impl<'a, I: ImageOperations> ImageRegistrar<'a, I> {
    pub fn new(ops: &'a I, visible: WaitConfig, cancel: CancellationToken) -> Self {
        Self {
            ops,
            visible,
            cancel,
        }
    }

    /// Look up an image owned by this account by exact name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<ImageId>, RegistrationError> {
        let operation = format!("look up image '{name}'");
        self.ops
            .find_image_by_name(name)
            .await
            .map_err(|e| RegistrationError::query(operation.as_str(), e))?
            .map(|id| ImageId::parse(id))
            .transpose()
            .map_err(|e| RegistrationError::query(operation.as_str(), e))
    }

    /// Register the image. A name taken in the meantime is `AlreadyExists`.
    pub async fn register(
        &self,
        request: &RegisterImageRequest,
    ) -> Result<ImageId, RegistrationError> {
        let operation = format!("register image '{}'", request.name);
        let raw = match self.ops.register_image(request).await {
            Ok(raw) => raw,
            Err(e) if matches!(classify_anyhow_error(&e), AwsError::DuplicateName) => {
                let existing = self.find_by_name(&request.name).await.ok().flatten();
                return Err(RegistrationError::AlreadyExists {
                    name: request.name.clone(),
                    image_id: existing.map_or_else(|| "unknown".to_string(), |id| id.to_string()),
                });
            }
            Err(e) => return Err(RegistrationError::operation(operation, e)),
        };

        ImageId::parse(raw).map_err(|e| RegistrationError::operation(operation, e))
    }

    /// Poll until the image is listed under its name.
    ///
    /// Never fails the run: a timeout or query error is logged and reported
    /// as not visible.
    pub async fn await_visible(&self, name: &str) -> bool {
        let result = wait_until(
            &self.visible,
            Some(&self.cancel),
            &format!("image '{name}' visible"),
            || self.ops.find_image_by_name(name),
            |found| found.is_some(),
        )
        .await;

        match result {
            Ok(_) => {
                info!(name = %name, "Image is visible");
                true
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Image registered but not confirmed visible");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ec2::MockImageOperations;
    use anyhow::anyhow;
    use aws_sdk_ec2::types::ArchitectureValues;
    use mockall::Sequence;

    fn registrar(ops: &MockImageOperations) -> ImageRegistrar<'_, MockImageOperations> {
        ImageRegistrar::new(ops, WaitConfig::from_secs(0, 10, 20), CancellationToken::new())
    }

    fn request() -> RegisterImageRequest {
        RegisterImageRequest {
            name: "debian-12-custom".to_string(),
            description: None,
            architecture: ArchitectureValues::X8664,
            root_device_name: "/dev/xvda".to_string(),
            snapshot_id: SnapshotId::parse("snap-0a1b2c3d").unwrap(),
            volume_size_gib: 8,
        }
    }

    #[tokio::test]
    async fn test_find_by_name_parses_ids() {
        let mut ops = MockImageOperations::new();
        ops.expect_find_image_by_name()
            .withf(|name| name == "debian-12-custom")
            .times(1)
            .returning(|_| Ok(Some("ami-0a1b2c3d".to_string())));
        let found = registrar(&ops).find_by_name("debian-12-custom").await.unwrap();
        assert_eq!(found.unwrap().as_str(), "ami-0a1b2c3d");

        let mut ops = MockImageOperations::new();
        ops.expect_find_image_by_name().returning(|_| Ok(None));
        assert!(registrar(&ops).find_by_name("x").await.unwrap().is_none());

        let mut ops = MockImageOperations::new();
        ops.expect_find_image_by_name()
            .returning(|_| Ok(Some("ami-???".to_string())));
        assert!(matches!(
            registrar(&ops).find_by_name("x").await.unwrap_err(),
            RegistrationError::ProviderQuery { .. }
        ));
    }

    #[tokio::test]
    async fn test_register_maps_duplicate_name() {
        let mut ops = MockImageOperations::new();
        ops.expect_register_image()
            .times(1)
            .returning(|_| Err(anyhow!("InvalidAMIName.Duplicate: name in use")));
        ops.expect_find_image_by_name()
            .times(1)
            .returning(|_| Ok(Some("ami-0f0e0d0c".to_string())));

        let err = registrar(&ops).register(&request()).await.unwrap_err();
        assert!(
            matches!(err, RegistrationError::AlreadyExists { ref image_id, .. } if image_id == "ami-0f0e0d0c")
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_register_failure_is_retryable() {
        let mut ops = MockImageOperations::new();
        ops.expect_register_image()
            .times(1)
            .returning(|_| Err(anyhow!("InvalidSnapshot.NotFound")));

        let err = registrar(&ops).register(&request()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Operation { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_visible_true_once_listed() {
        let mut ops = MockImageOperations::new();
        let mut seq = Sequence::new();
        ops.expect_find_image_by_name()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        ops.expect_find_image_by_name()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some("ami-0a1b2c3d".to_string())));

        assert!(registrar(&ops).await_visible("debian-12-custom").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_visible_false_on_timeout_or_error() {
        let mut ops = MockImageOperations::new();
        ops.expect_find_image_by_name().times(20).returning(|_| Ok(None));
        assert!(!registrar(&ops).await_visible("x").await);

        let mut ops = MockImageOperations::new();
        ops.expect_find_image_by_name()
            .times(1)
            .returning(|_| Err(anyhow!("throttled")));
        assert!(!registrar(&ops).await_visible("x").await);
    }
}
