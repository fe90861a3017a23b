//! Polling of long-running provider requests and snapshot availability.
//!
//! Every mutating call returns before the resource is usable. The waiter
//! polls the request-status endpoint at a fixed interval until the request
//! reaches a terminal state or the retry budget runs out. The inter-poll
//! delay is the only suspension point and observes the run's cancellation
//! token.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cloud::types::{OperationHandle, SnapshotId};
use crate::cloud::{CloudApi, CloudError};

/// Poll attempts for resource-creation requests.
pub const RESOURCE_RETRIES: u32 = 120;
/// Delay between resource-creation polls.
pub const RESOURCE_INTERVAL: Duration = Duration::from_secs(1);
/// Poll attempts for snapshot requests and snapshot availability.
pub const SNAPSHOT_RETRIES: u32 = 50;
/// Delay between snapshot polls.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);

/// Retry budget and fixed delay of a polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Maximum number of status fetches.
    pub retries: u32,
    /// Delay between two fetches.
    pub interval: Duration,
}

impl WaitPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(retries: u32, interval: Duration) -> Self {
        Self { retries, interval }
    }

    /// Defaults for resource-creation requests.
    #[must_use]
    pub const fn resource_creation() -> Self {
        Self::new(RESOURCE_RETRIES, RESOURCE_INTERVAL)
    }

    /// Defaults for snapshot requests.
    #[must_use]
    pub const fn snapshot() -> Self {
        Self::new(SNAPSHOT_RETRIES, SNAPSHOT_INTERVAL)
    }

    /// Replaces the retry budget when `retries` is non-zero.
    #[must_use]
    pub const fn with_retry_override(self, retries: u32) -> Self {
        if retries == 0 {
            self
        } else {
            Self::new(retries, self.interval)
        }
    }

    /// Replaces the delay between fetches.
    #[must_use]
    pub const fn with_interval(self, interval: Duration) -> Self {
        Self::new(self.retries, interval)
    }

    /// Total time spent sleeping when the budget is exhausted.
    #[must_use]
    pub fn budget(self) -> Duration {
        self.interval.saturating_mul(self.retries)
    }
}

/// Status of a provider request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// Queued or running.
    Pending,
    /// Completed successfully.
    Done,
    /// Completed with an error.
    Failed,
}

impl OperationStatus {
    /// Classifies a raw status. Anything other than `DONE` or `FAILED` is
    /// still pending.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "DONE" => Self::Done,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Result of a request wait that did not fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The request reported `DONE`.
    Done {
        /// Status fetches issued.
        attempts: u32,
    },
    /// The retry budget ran out while the request was still pending. Callers
    /// carry on as if the request had completed.
    Exhausted {
        /// Status fetches issued.
        attempts: u32,
    },
}

/// Errors raised while waiting.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// The provider reported the request as `FAILED`.
    #[error("request failed: {message}")]
    Failed {
        /// Provider-supplied message.
        message: String,
    },
    /// The run was cancelled during a poll delay.
    #[error("wait cancelled")]
    Cancelled,
    /// The snapshot never became available.
    #[error(
        "snapshot {snapshot_id} not created after waiting {} seconds",
        waited.as_secs()
    )]
    SnapshotUnavailable {
        /// Snapshot being waited on.
        snapshot_id: SnapshotId,
        /// Total delay spent waiting.
        waited: Duration,
    },
    /// A status fetch failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Polls provider requests and resources.
#[derive(Clone, Copy)]
pub struct OperationWaiter<'a> {
    api: &'a dyn CloudApi,
    cancel: &'a CancellationToken,
}

impl<'a> OperationWaiter<'a> {
    /// Creates a waiter bound to `api` and the run's cancellation token.
    #[must_use]
    pub const fn new(api: &'a dyn CloudApi, cancel: &'a CancellationToken) -> Self {
        Self { api, cancel }
    }

    /// Waits for the request behind `handle` to finish.
    ///
    /// Returns as soon as `DONE` is observed. Exhausting the budget is not
    /// an error: the outcome is [`WaitOutcome::Exhausted`].
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Failed`] when the request reports `FAILED`,
    /// [`WaitError::Cloud`] when a status fetch fails (no retry), and
    /// [`WaitError::Cancelled`] when the token fires during a delay.
    pub async fn wait(
        &self,
        handle: OperationHandle,
        policy: WaitPolicy,
    ) -> Result<WaitOutcome, WaitError> {
        for attempt in 1..=policy.retries {
            let status = self.api.request_status(&handle).await?.into_body()?;
            let metadata = status.metadata;
            debug!(handle = %handle, attempt, status = %metadata.status, "polled request");
            match OperationStatus::parse(&metadata.status) {
                OperationStatus::Done => return Ok(WaitOutcome::Done { attempts: attempt }),
                OperationStatus::Failed => {
                    return Err(WaitError::Failed {
                        message: metadata.message.unwrap_or_default(),
                    });
                }
                OperationStatus::Pending => {}
            }
            if attempt < policy.retries {
                self.pause(policy.interval).await?;
            }
        }

        warn!(handle = %handle, retries = policy.retries, "request still pending, continuing");
        Ok(WaitOutcome::Exhausted {
            attempts: policy.retries,
        })
    }

    /// Waits until the snapshot reports `AVAILABLE` and returns the number of
    /// fetches issued.
    ///
    /// # Errors
    ///
    /// Unlike [`OperationWaiter::wait`], exhausting the budget fails with
    /// [`WaitError::SnapshotUnavailable`]. Non-success fetches fail with
    /// [`WaitError::Cloud`].
    pub async fn wait_for_snapshot(
        &self,
        snapshot: &SnapshotId,
        policy: WaitPolicy,
    ) -> Result<u32, WaitError> {
        for attempt in 1..=policy.retries {
            let found = self.api.find_snapshot(snapshot).await?.into_body()?;
            debug!(snapshot = %snapshot, attempt, state = %found.metadata.state, "polled snapshot");
            if found.metadata.state.eq_ignore_ascii_case("AVAILABLE") {
                return Ok(attempt);
            }
            if attempt < policy.retries {
                self.pause(policy.interval).await?;
            }
        }

        Err(WaitError::SnapshotUnavailable {
            snapshot_id: snapshot.clone(),
            waited: policy.budget(),
        })
    }

    async fn pause(&self, interval: Duration) -> Result<(), WaitError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(WaitError::Cancelled),
            () = sleep(interval) => Ok(()),
        }
    }
}
