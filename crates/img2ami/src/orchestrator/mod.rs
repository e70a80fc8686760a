//! Registration workflow
//!
//! Components each own one slice of the resource lifecycle; the engine drives
//! them through the phase state machine and [`register_image`] wires in AWS,
//! ssh and operator interrupts.

pub mod engine;
pub mod guard;
pub mod phase;
pub mod provision;
pub mod registrar;
pub mod report;
pub mod storage;

pub use engine::RegistrationOrchestrator;
pub use guard::{CleanupGuard, Compensation};
pub use phase::{Attempt, AttemptOutcome, Phase, Transition};
pub use provision::{ComputeProvisioner, WorkerInstance};
pub use registrar::{ImageRegistrar, RegisteredImage};
pub use report::RegistrationReport;
pub use storage::StorageLifecycle;

use crate::aws::{AwsContext, Ec2Client, ImageOperations, InstanceOperations, RunTags, VolumeOperations};
use crate::config::RunPlan;
use crate::error::RegistrationError;
use crate::transfer::{RemoteTransfer, SshTransfer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the full workflow, racing it against `cancel`.
///
/// Whatever the outcome, resources still tracked once the workflow stops are
/// compensated before returning. An interrupt surfaces as
/// [`RegistrationError::Interrupted`].
pub async fn run_workflow<C, V, I, T>(
    plan: &RunPlan,
    compute: &C,
    volumes: &V,
    images: &I,
    transfer: &T,
    cancel: CancellationToken,
) -> Result<RegistrationReport, RegistrationError>
where
    C: InstanceOperations,
    V: VolumeOperations,
    I: ImageOperations,
    T: RemoteTransfer,
{
    let orchestrator =
        RegistrationOrchestrator::new(plan, compute, volumes, images, transfer, cancel.clone());
    let mut guard = CleanupGuard::default();

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            warn!("Interrupted, cleaning up");
            Err(RegistrationError::Interrupted)
        }
        result = orchestrator.run(&mut guard) => result,
    };

    if !guard.is_empty() {
        orchestrator.compensate(&mut guard).await;
    }
    result
}

/// Register the image described by `plan`.
///
/// Returns `None` for a dry run, which stops after the preflight check.
pub async fn register_image(
    plan: &RunPlan,
) -> Result<Option<RegistrationReport>, RegistrationError> {
    let aws = &plan.config.aws;
    if let Some(profile) = &aws.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }
    let ctx = AwsContext::new(&aws.region, aws.aws_profile.as_deref()).await;
    let ec2 = Ec2Client::from_context(&ctx).with_run_tags(RunTags::new(&plan.run_id, plan.image_name()));
    let transfer = SshTransfer::new(
        &plan.ssh_key,
        plan.config.transfer.ssh_user.as_str(),
        plan.connect_timeout(),
        plan.transfer_timeout(),
    );

    let cancel = CancellationToken::new();

    if plan.dry_run() {
        RegistrationOrchestrator::new(plan, &ec2, &ec2, &ec2, &transfer, cancel)
            .preflight()
            .await?;
        info!(name = %plan.image_name(), "Dry run passed, no resources created");
        return Ok(None);
    }

    let listener = tokio::spawn(listen_for_interrupt(cancel.clone()));
    info!(
        run_id = %plan.run_id,
        name = %plan.image_name(),
        region = %aws.region,
        volume_size_gib = plan.volume_size_gib,
        max_attempts = plan.max_attempts(),
        "Starting registration"
    );

    let result = run_workflow(plan, &ec2, &ec2, &ec2, &transfer, cancel).await;
    listener.abort();
    result.map(Some)
}

/// Cancel `cancel` on Ctrl-C or SIGTERM
async fn listen_for_interrupt(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }

    warn!("Received interrupt, stopping");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ec2::{MockImageOperations, MockInstanceOperations, MockVolumeOperations};
    use crate::config::tests::config_for;
    use crate::transfer::MockRemoteTransfer;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_worker_boots_terminates_it_once() {
        let image = NamedTempFile::new().unwrap();
        let key = NamedTempFile::new().unwrap();
        let plan = config_for(image.path(), key.path()).validate().unwrap();
        let cancel = CancellationToken::new();

        let mut images = MockImageOperations::new();
        images.expect_find_image_by_name().returning(|_| Ok(None));
        let mut compute = MockInstanceOperations::new();
        compute
            .expect_run_instance()
            .times(1)
            .returning(|_| Ok("i-0a1b2c3d".to_string()));
        // Interrupt lands inside the initial delay, before the first poll
        compute.expect_instance_state().never();
        compute
            .expect_terminate_instance()
            .withf(|id| id == "i-0a1b2c3d")
            .times(1)
            .returning(|_| Ok(()));

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });

        let result = run_workflow(
            &plan,
            &compute,
            &MockVolumeOperations::new(),
            &images,
            &MockRemoteTransfer::new(),
            cancel,
        )
        .await;

        assert!(matches!(result.unwrap_err(), RegistrationError::Interrupted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_before_start_creates_nothing() {
        let image = NamedTempFile::new().unwrap();
        let key = NamedTempFile::new().unwrap();
        let plan = config_for(image.path(), key.path()).validate().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut images = MockImageOperations::new();
        images.expect_find_image_by_name().never();
        let mut compute = MockInstanceOperations::new();
        compute.expect_run_instance().never();
        compute.expect_terminate_instance().never();

        let result = run_workflow(
            &plan,
            &compute,
            &MockVolumeOperations::new(),
            &images,
            &MockRemoteTransfer::new(),
            cancel,
        )
        .await;

        assert!(matches!(result.unwrap_err(), RegistrationError::Interrupted));
    }
}
