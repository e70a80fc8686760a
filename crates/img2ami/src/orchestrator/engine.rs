//! The registration state machine
//!
//! `RegistrationOrchestrator` runs the preflight check once, then repeats
//! provision → transfer → reclaim → register until an attempt succeeds, a
//! fatal error occurs or the attempt budget runs out. Every live resource is
//! registered with the caller's [`CleanupGuard`] as soon as it exists.

use super::guard::{CleanupGuard, Compensation};
use super::phase::{Attempt, AttemptOutcome, Phase, Transition};
use super::provision::{ComputeProvisioner, WorkerInstance};
use super::registrar::{ImageRegistrar, RegisteredImage};
use super::report::RegistrationReport;
use super::storage::StorageLifecycle;
use crate::aws::{ImageOperations, InstanceOperations, VolumeOperations};
use crate::config::RunPlan;
use crate::error::RegistrationError;
use crate::transfer::{RemoteTransfer, wait_for_device};
use img2ami_common::SnapshotId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct RegistrationOrchestrator<'a, C, V, I, T> {
    plan: &'a RunPlan,
    compute: ComputeProvisioner<'a, C>,
    storage: StorageLifecycle<'a, V>,
    registrar: ImageRegistrar<'a, I>,
    transfer: &'a T,
    cancel: CancellationToken,
}

impl<'a, C, V, I, T> RegistrationOrchestrator<'a, C, V, I, T>
where
    C: InstanceOperations,
    V: VolumeOperations,
    I: ImageOperations,
    T: RemoteTransfer,
{
    pub fn new(
        plan: &'a RunPlan,
        compute: &'a C,
        volumes: &'a V,
        images: &'a I,
        transfer: &'a T,
        cancel: CancellationToken,
    ) -> Self {
        let budgets = plan.budgets();
        Self {
            plan,
            compute: ComputeProvisioner::new(compute, budgets.instance_running, cancel.clone()),
            storage: StorageLifecycle::new(
                volumes,
                budgets.volume_available,
                budgets.snapshot_completed,
                cancel.clone(),
            ),
            registrar: ImageRegistrar::new(images, budgets.image_visible, cancel.clone()),
            transfer,
            cancel,
        }
    }

    /// Refuse to start when an image with the target name already exists
    pub async fn preflight(&self) -> Result<(), RegistrationError> {
        let name = self.plan.image_name();
        match self.registrar.find_by_name(name).await? {
            Some(image_id) => Err(RegistrationError::AlreadyExists {
                name: name.to_string(),
                image_id: image_id.to_string(),
            }),
            None => {
                info!(name = %name, "No existing image with this name");
                Ok(())
            }
        }
    }

    /// Drive the run to completion.
    ///
    /// Retryable failures compensate through `guard` and start a fresh
    /// attempt; fatal failures compensate and return. A new attempt only
    /// starts once the guard is empty, so a handle is never displaced. Resources still
    /// tracked after a successful attempt are released before returning.
    pub async fn run(
        &self,
        guard: &mut CleanupGuard,
    ) -> Result<RegistrationReport, RegistrationError> {
        let max_attempts = self.plan.max_attempts();
        let mut attempts = Vec::new();
        let mut ordinal = 1;
        let mut phase = Phase::PreflightCheck;

        loop {
            let in_preflight = matches!(phase, Phase::PreflightCheck);
            debug!(phase = %phase, attempt = ordinal, "Entering phase");

            match Transition::from_step(in_preflight, self.step(phase, guard).await) {
                Transition::Advance(Phase::Done(image)) => {
                    attempts.push(Attempt::succeeded(ordinal));
                    if !guard.is_empty() {
                        self.compensate(guard).await;
                    }
                    return Ok(self.report(image, attempts));
                }
                Transition::Advance(next) => phase = next,
                Transition::RetryAttempt(err) => {
                    warn!(
                        attempt = ordinal,
                        max_attempts,
                        error = %err,
                        "Attempt failed"
                    );
                    if let Some(hint) = err.suggestion() {
                        info!(hint = %hint, "Suggestion");
                    }
                    attempts.push(Attempt::failed(
                        ordinal,
                        AttemptOutcome::RetryableFailure,
                        &err,
                    ));
                    self.compensate(guard).await;

                    if ordinal >= max_attempts {
                        return Err(RegistrationError::NoAttemptsSucceeded {
                            attempts: ordinal,
                            last_error: err.to_string(),
                        });
                    }
                    if !guard.is_empty() {
                        warn!("Retrying cleanup before the next attempt");
                        self.compensate(guard).await;
                    }
                    if let Some(resource) = guard.describe_tracked() {
                        return Err(RegistrationError::CleanupIncomplete { resource });
                    }
                    ordinal += 1;
                    info!(attempt = ordinal, max_attempts, "Starting new attempt");
                    phase = Phase::Provisioning;
                }
                Transition::FatalAbort(err) => {
                    if !in_preflight {
                        attempts.push(Attempt::failed(ordinal, AttemptOutcome::FatalFailure, &err));
                    }
                    self.compensate(guard).await;
                    return Err(err);
                }
            }
        }
    }

    /// Release whatever `guard` still tracks
    pub async fn compensate(&self, guard: &mut CleanupGuard) -> Compensation {
        if guard.is_empty() {
            return Compensation::Nothing;
        }
        info!("Cleaning up ephemeral resources");
        guard.compensate(&self.compute, &self.storage).await
    }

    async fn step(
        &self,
        phase: Phase,
        guard: &mut CleanupGuard,
    ) -> Result<Phase, RegistrationError> {
        match phase {
            Phase::PreflightCheck => self.preflight().await.map(|()| Phase::Provisioning),
            Phase::Provisioning => self.provision(guard).await.map(Phase::Transferring),
            Phase::Transferring(worker) => {
                self.transfer_image(&worker).await?;
                Ok(Phase::Reclaiming(worker))
            }
            Phase::Reclaiming(worker) => self.reclaim(&worker, guard).await.map(Phase::Registering),
            Phase::Registering(snapshot_id) => self.register(snapshot_id).await.map(Phase::Done),
            done @ Phase::Done(_) => Ok(done),
        }
    }

    async fn provision(
        &self,
        guard: &mut CleanupGuard,
    ) -> Result<WorkerInstance, RegistrationError> {
        if let Some(resource) = guard.describe_tracked() {
            return Err(RegistrationError::CleanupIncomplete { resource });
        }
        let instance_id = self.compute.launch(&self.plan.launch_request()).await?;
        info!(instance_id = %instance_id, "Launched worker");
        guard.acquire_instance(instance_id.clone());

        if let Err(err) = self.compute.await_running(&instance_id).await {
            match self.compute.terminate(&instance_id).await {
                Ok(()) => {
                    guard.release_instance();
                }
                Err(e) => warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "Failed to terminate worker that never became ready"
                ),
            }
            return Err(err);
        }

        let device = self.plan.device_name();
        let worker = self.compute.describe(&instance_id, device).await?;
        wait_for_device(
            self.transfer,
            &worker.public_address,
            device,
            &self.plan.budgets().device_ready,
            Some(&self.cancel),
        )
        .await?;

        Ok(worker)
    }

    async fn transfer_image(&self, worker: &WorkerInstance) -> Result<(), RegistrationError> {
        let remote_path = self
            .transfer
            .upload(&worker.public_address, self.plan.image_path())
            .await
            .map_err(|error| RegistrationError::Transfer {
                stage: "upload",
                error,
            })?;

        self.transfer
            .write_to_device(&worker.public_address, &remote_path, self.plan.device_name())
            .await
            .map_err(|error| RegistrationError::Transfer {
                stage: "device write",
                error,
            })?;

        info!(instance_id = %worker.id, volume_id = %worker.volume_id, "Image written to volume");
        Ok(())
    }

    async fn reclaim(
        &self,
        worker: &WorkerInstance,
        guard: &mut CleanupGuard,
    ) -> Result<SnapshotId, RegistrationError> {
        let volume_id = &worker.volume_id;

        if let Some(stale) = guard.volume() {
            return Err(RegistrationError::CleanupIncomplete {
                resource: format!("volume {stale}"),
            });
        }
        self.storage.detach(volume_id).await?;
        guard.acquire_volume(volume_id.clone());

        match self.compute.terminate(&worker.id).await {
            Ok(()) => {
                guard.release_instance();
            }
            Err(e) => warn!(
                instance_id = %worker.id,
                error = %e,
                "Failed to terminate worker, will retry during cleanup"
            ),
        }

        self.storage.await_available(volume_id).await?;
        let snapshot_id = self
            .storage
            .snapshot(volume_id, &self.plan.snapshot_description())
            .await?;
        info!(snapshot_id = %snapshot_id, volume_id = %volume_id, "Snapshot started");

        if let Err(err) = self.storage.await_completed(&snapshot_id).await {
            warn!(
                snapshot_id = %snapshot_id,
                "Snapshot of a failed attempt is left behind for cleanup-orphans"
            );
            return Err(err);
        }

        match self.storage.delete(volume_id).await {
            Ok(()) => {
                guard.release_volume();
            }
            Err(e) => warn!(volume_id = %volume_id, error = %e, "Failed to delete working volume"),
        }

        Ok(snapshot_id)
    }

    async fn register(&self, snapshot_id: SnapshotId) -> Result<RegisteredImage, RegistrationError> {
        let request = self.plan.register_request(snapshot_id.clone());
        let image_id = match self.registrar.register(&request).await {
            Ok(image_id) => image_id,
            Err(err) => {
                warn!(
                    snapshot_id = %snapshot_id,
                    "Snapshot was not registered and is left behind for cleanup-orphans"
                );
                return Err(err);
            }
        };
        info!(image_id = %image_id, name = %request.name, "Registered image");

        let visible = self.registrar.await_visible(&request.name).await;
        Ok(RegisteredImage {
            image_id,
            snapshot_id,
            visible,
        })
    }

    fn report(&self, image: RegisteredImage, attempts: Vec<Attempt>) -> RegistrationReport {
        RegistrationReport {
            run_id: self.plan.run_id.clone(),
            image_name: self.plan.image_name().to_string(),
            image_id: image.image_id,
            snapshot_id: image.snapshot_id,
            volume_size_gib: self.plan.volume_size_gib,
            visible: image.visible,
            attempts,
            finished_at: chrono::Utc::now(),
        }
    }
}
