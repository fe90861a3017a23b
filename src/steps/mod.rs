//! Pipeline steps and the context they share.
//!
//! A step either lets the pipeline continue or halts it. Failures are
//! reported to the operator and recorded on [`PipelineState`] before the
//! step returns [`StepAction::Halt`], so the driver never sees an error
//! value, only the decision.

mod connect;
mod create_server;
mod snapshot;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cloud::types::{OperationHandle, ServerId};
use crate::cloud::{CloudError, CloudFuture, require_location};
use crate::guest::{Communicator, GuestError};
use crate::state::PipelineState;
use crate::ui::Ui;
use crate::wait::{OperationWaiter, WaitError, WaitOutcome, WaitPolicy};

pub use connect::ConnectStep;
pub use create_server::{CreateServerStep, ServerSpec};
pub use snapshot::{SYNC_COMMAND, SnapshotStep};

/// Decision returned by [`Step::run`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepAction {
    /// Run the next step.
    Continue,
    /// Stop the pipeline and roll back.
    Halt,
}

/// Future returned by [`Step::run`].
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = StepAction> + Send + 'a>>;

/// Future returned by [`Step::cleanup`].
pub type CleanupFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Single stage of the build pipeline.
pub trait Step: Send + Sync {
    /// Short name used in logs and halt reports.
    fn name(&self) -> &'static str;

    /// Runs the step against the shared context.
    fn run<'a>(&'a self, context: &'a mut BuildContext) -> StepFuture<'a>;

    /// Releases whatever the step created. Runs in reverse step order once
    /// the pipeline stops. Best-effort: failures are reported, never raised.
    fn cleanup<'a>(&'a self, context: &'a mut BuildContext) -> CleanupFuture<'a>;
}

/// Everything a step may read or write while the pipeline runs.
pub struct BuildContext {
    /// Operator-facing reporting.
    pub ui: Arc<dyn Ui>,
    /// Cancellation signal for the whole run.
    pub cancel: CancellationToken,
    /// Values produced by earlier steps.
    pub state: PipelineState,
    /// Channel to the build server, installed once it is reachable.
    pub communicator: Option<Box<dyn Communicator>>,
}

impl BuildContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new(ui: Arc<dyn Ui>, cancel: CancellationToken) -> Self {
        Self {
            ui,
            cancel,
            state: PipelineState::default(),
            communicator: None,
        }
    }

    /// Reports `err` to the operator, records it and halts.
    pub(crate) fn halt(&mut self, err: &StepError) -> StepAction {
        let message = err.to_string();
        self.ui.error(&message);
        self.state.record_error(message);
        StepAction::Halt
    }

    /// Maps the result of a step body onto a [`StepAction`].
    pub(crate) fn conclude(&mut self, result: Result<(), StepError>) -> StepAction {
        match result {
            Ok(()) => StepAction::Continue,
            Err(err) => self.halt(&err),
        }
    }
}

/// Errors that halt a step. `Display` is the operator-facing message.
#[derive(Debug, Error)]
pub enum StepError {
    /// A provider request failed.
    #[error("Error occurred while {action}: {source}")]
    Request {
        /// Action being performed.
        action: &'static str,
        /// Underlying request error.
        source: CloudError,
    },
    /// Waiting on a provider request failed or was cancelled.
    #[error("Error occurred while {action}: {source}")]
    Wait {
        /// Action being confirmed.
        action: &'static str,
        /// Underlying wait error.
        source: WaitError,
    },
    /// A value expected from an earlier step is absent.
    #[error("{key} not found in pipeline state")]
    MissingState {
        /// Missing state field.
        key: &'static str,
    },
    /// No guest channel is installed.
    #[error("no communicator found")]
    NoCommunicator,
    /// A provider response lacked a field the step relies on.
    #[error("server {server} has no {field}")]
    MissingServerField {
        /// Server being inspected.
        server: ServerId,
        /// Missing field.
        field: &'static str,
    },
    /// The server address did not parse.
    #[error("server reported an invalid IP address `{value}`")]
    InvalidIp {
        /// Raw address.
        value: String,
    },
    /// Flushing guest file systems failed.
    #[error("Error occurred while syncing file system changes: {0}")]
    Sync(#[source] GuestError),
    /// The build server never accepted connections.
    #[error("Error occurred while waiting for SSH on {address}: {message}")]
    Connect {
        /// Address being probed.
        address: String,
        /// Last connection error or cancellation reason.
        message: String,
    },
}

impl StepError {
    fn request(action: &'static str) -> impl FnOnce(CloudError) -> Self {
        move |source| Self::Request { action, source }
    }
}

/// Mutating call accepted by the provider.
pub(crate) struct Accepted<T> {
    pub(crate) body: T,
    location: Option<OperationHandle>,
    status: u16,
}

/// Awaits a mutating call and splits a successful answer.
pub(crate) async fn submit<T>(
    call: CloudFuture<'_, T>,
    action: &'static str,
) -> Result<Accepted<T>, StepError> {
    let response = call.await.map_err(StepError::request(action))?;
    let status = response.status;
    let (body, location) = response
        .into_parts()
        .map_err(StepError::request(action))?;
    Ok(Accepted {
        body,
        location,
        status,
    })
}

impl<T> Accepted<T> {
    /// Waits for the request behind this answer. The body is returned so
    /// callers can keep using it after confirmation.
    pub(crate) async fn confirm(
        self,
        waiter: &OperationWaiter<'_>,
        policy: WaitPolicy,
        action: &'static str,
    ) -> Result<(T, WaitOutcome), StepError> {
        let handle = require_location(self.location, self.status)
            .map_err(StepError::request(action))?;
        let outcome = waiter
            .wait(handle, policy)
            .await
            .map_err(|source| StepError::Wait { action, source })?;
        Ok((self.body, outcome))
    }
}
