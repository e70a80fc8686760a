//! Workflow phases, transitions and attempt records

use super::provision::WorkerInstance;
use super::registrar::RegisteredImage;
use crate::error::RegistrationError;
use img2ami_common::SnapshotId;
use serde::Serialize;
use strum::Display;

/// Where a run currently is.
///
/// Each phase carries what the previous phase produced, so attempt-scoped
/// state is discarded as soon as an attempt is abandoned.
#[derive(Debug, Clone, PartialEq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    PreflightCheck,
    Provisioning,
    Transferring(WorkerInstance),
    Reclaiming(WorkerInstance),
    Registering(SnapshotId),
    Done(RegisteredImage),
}

/// Edge taken after a phase step
#[derive(Debug)]
pub enum Transition {
    Advance(Phase),
    RetryAttempt(RegistrationError),
    FatalAbort(RegistrationError),
}

impl Transition {
    /// Map a step result to an edge.
    ///
    /// Failures during the preflight check are always fatal; later failures
    /// retry when the error is retryable.
    pub fn from_step(in_preflight: bool, result: Result<Phase, RegistrationError>) -> Self {
        match result {
            Ok(next) => Transition::Advance(next),
            Err(err) if in_preflight => Transition::FatalAbort(err),
            Err(err) if err.is_retryable() => Transition::RetryAttempt(err),
            Err(err) => Transition::FatalAbort(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

/// One pass through provisioning, transfer, reclaim and registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// 1-based
    pub ordinal: u32,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Attempt {
    pub fn succeeded(ordinal: u32) -> Self {
        Self {
            ordinal,
            outcome: AttemptOutcome::Success,
            error: None,
        }
    }

    pub fn failed(ordinal: u32, outcome: AttemptOutcome, error: &RegistrationError) -> Self {
        Self {
            ordinal,
            outcome,
            error: Some(error.to_string()),
        }
    }
}
