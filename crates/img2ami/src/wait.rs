//! Bounded polling of provider state with cancellation support.
//!
//! Every asynchronous transition in a run (instance running, device visible,
//! volume available, snapshot completed, image visible) is observed through
//! [`wait_until`]: an initial delay, then a fixed number of polls spaced by a
//! constant delay.

use backon::{BackoffBuilder, ConstantBuilder};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Poll budget for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Delay before the first poll
    pub initial_delay: Duration,
    /// Delay between consecutive polls
    pub poll_delay: Duration,
    /// Maximum number of polls
    pub max_polls: u32,
}

impl WaitConfig {
    pub const fn from_secs(initial_delay: u64, poll_delay: u64, max_polls: u32) -> Self {
        Self {
            initial_delay: Duration::from_secs(initial_delay),
            poll_delay: Duration::from_secs(poll_delay),
            max_polls,
        }
    }

    /// Upper bound on the wall time spent sleeping, ignoring fetch latency
    pub fn max_wait(&self) -> Duration {
        self.initial_delay + self.poll_delay * self.max_polls.saturating_sub(1)
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out waiting for {resource} after {polls} polls (last state: {last_state})")]
    Timeout {
        resource: String,
        polls: u32,
        last_state: String,
    },

    #[error("failed to query {resource}: {error:#}")]
    Query {
        resource: String,
        error: anyhow::Error,
    },

    #[error("wait for {resource} cancelled")]
    Cancelled { resource: String },
}

/// Poll `fetch` until `is_target` accepts the observed state.
///
/// Sleeps `initial_delay`, then polls at most `max_polls` times with
/// `poll_delay` between polls. The first matching state is returned without
/// any further polls.
///
/// # Example
/// ```ignore
/// let state = wait_until(
///     &WaitConfig::from_secs(20, 6, 10),
///     Some(&cancel),
///     "instance i-0a1b2c3d running",
///     || ec2.instance_state("i-0a1b2c3d"),
///     |state| *state == InstanceStateName::Running,
/// )
/// .await?;
/// ```
pub async fn wait_until<S, F, Fut, P>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    resource_name: &str,
    mut fetch: F,
    is_target: P,
) -> Result<S, WaitError>
where
    S: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<S>>,
    P: Fn(&S) -> bool,
{
    debug!(
        resource = %resource_name,
        initial_delay_secs = config.initial_delay.as_secs(),
        poll_delay_secs = config.poll_delay.as_secs(),
        max_polls = config.max_polls,
        "Waiting"
    );
    sleep_or_cancel(config.initial_delay, cancel, resource_name).await?;

    // One delay between each pair of polls
    let mut delays = ConstantBuilder::default()
        .with_delay(config.poll_delay)
        .with_max_times(config.max_polls.saturating_sub(1) as usize)
        .build();

    let mut last_state: Option<String> = None;

    for poll in 1..=config.max_polls {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(cancelled(resource_name));
        }

        let state = fetch().await.map_err(|error| WaitError::Query {
            resource: resource_name.to_string(),
            error,
        })?;

        info!(
            resource = %resource_name,
            poll,
            max_polls = config.max_polls,
            state = ?state,
            "Polled"
        );

        if is_target(&state) {
            return Ok(state);
        }
        last_state = Some(format!("{state:?}"));

        if let Some(delay) = delays.next() {
            sleep_or_cancel(delay, cancel, resource_name).await?;
        }
    }

    Err(WaitError::Timeout {
        resource: resource_name.to_string(),
        polls: config.max_polls,
        last_state: last_state.unwrap_or_else(|| "never polled".to_string()),
    })
}

async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&CancellationToken>,
    resource_name: &str,
) -> Result<(), WaitError> {
    if delay.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = async {
            if let Some(token) = cancel {
                token.cancelled().await
            } else {
                std::future::pending::<()>().await
            }
        } => Err(cancelled(resource_name)),
    }
}

fn cancelled(resource_name: &str) -> WaitError {
    WaitError::Cancelled {
        resource: resource_name.to_string(),
    }
}
