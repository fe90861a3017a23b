//! Snapshot of the build server's boot volume.

use std::sync::Arc;

use tokio::task;
use tracing::info;

use super::{BuildContext, CleanupFuture, Step, StepError, StepFuture, submit};
use crate::cloud::types::{DatacenterId, ServerId, SnapshotRequest, VolumeId};
use crate::cloud::{ApiResponse, CloudApi};
use crate::guest::GuestError;
use crate::wait::{OperationWaiter, WaitError, WaitPolicy};

/// Command run on Linux guests before the snapshot is taken.
pub const SYNC_COMMAND: &str = "sync";

/// Flushes guest file systems, snapshots the boot volume and waits until
/// the snapshot is available.
///
/// Cleanup is a no-op: the snapshot is the artifact of the run.
pub struct SnapshotStep {
    api: Arc<dyn CloudApi>,
    name: String,
    policy: WaitPolicy,
}

struct Targets {
    datacenter: DatacenterId,
    volume: VolumeId,
    server: ServerId,
}

impl SnapshotStep {
    /// Creates the step. `policy` applies to both the snapshot request and
    /// the availability poll.
    #[must_use]
    pub fn new(api: Arc<dyn CloudApi>, name: impl Into<String>, policy: WaitPolicy) -> Self {
        Self {
            api,
            name: name.into(),
            policy,
        }
    }

    fn targets(context: &BuildContext) -> Result<Targets, StepError> {
        let state = &context.state;
        Ok(Targets {
            datacenter: state
                .datacenter_id
                .clone()
                .ok_or(StepError::MissingState {
                    key: "datacenter_id",
                })?,
            volume: state
                .volume_id
                .clone()
                .ok_or(StepError::MissingState { key: "volume_id" })?,
            server: state
                .instance_id
                .clone()
                .ok_or(StepError::MissingState { key: "instance_id" })?,
        })
    }

    async fn operating_system(&self, targets: &Targets) -> Result<String, StepError> {
        let lookup = |source| StepError::Request {
            action: "getting the server os",
            source,
        };
        let server = self
            .api
            .find_server(&targets.datacenter, &targets.server)
            .await
            .and_then(ApiResponse::into_body)
            .map_err(lookup)?;
        let boot_volume = server
            .properties
            .boot_volume
            .ok_or_else(|| StepError::MissingServerField {
                server: targets.server.clone(),
                field: "boot volume",
            })?;
        let volume = self
            .api
            .find_volume(&targets.datacenter, &VolumeId::from(boot_volume.id))
            .await
            .and_then(ApiResponse::into_body)
            .map_err(lookup)?;
        Ok(volume.properties.licence_type.unwrap_or_default())
    }

    async fn take_snapshot(&self, context: &mut BuildContext) -> Result<(), StepError> {
        let targets = Self::targets(context)?;
        if context.communicator.is_none() {
            return Err(StepError::NoCommunicator);
        }

        let os = self.operating_system(&targets).await?;
        context.ui.say(&format!("Server OS is {os}"));
        if os.eq_ignore_ascii_case("linux") {
            context.ui.say("syncing file system changes");
            sync_guest(context).await?;
        }

        context.ui.say(&format!(
            "Creating a snapshot for {}/volumes/{}",
            targets.datacenter, targets.volume
        ));
        let cancel = context.cancel.clone();
        let waiter = OperationWaiter::new(self.api.as_ref(), &cancel);
        let request = SnapshotRequest {
            name: self.name.clone(),
        };
        let (snapshot, _) = submit(
            self.api
                .create_snapshot(&targets.datacenter, &targets.volume, &request),
            "creating a snapshot",
        )
        .await?
        .confirm(&waiter, self.policy, "waiting for the snapshot request")
        .await?;

        context
            .ui
            .say(&format!("waiting for snapshot {} to become available", snapshot.id));
        waiter
            .wait_for_snapshot(&snapshot.id, self.policy)
            .await
            .map_err(|source| StepError::Wait {
                action: "waiting for the snapshot to be created",
                source,
            })?;
        context.ui.say("snapshot created");
        info!(snapshot = %snapshot.id, name = %self.name, "snapshot available");

        context.state.snapshot_name = Some(self.name.clone());
        Ok(())
    }
}

/// Runs [`SYNC_COMMAND`] off the async workers. Cancellation abandons the
/// command and its communicator.
async fn sync_guest(context: &mut BuildContext) -> Result<(), StepError> {
    let communicator = context
        .communicator
        .take()
        .ok_or(StepError::NoCommunicator)?;
    let task = task::spawn_blocking(move || {
        let result = communicator.execute(SYNC_COMMAND);
        (communicator, result)
    });

    let joined = tokio::select! {
        biased;
        () = context.cancel.cancelled() => {
            return Err(StepError::Wait {
                action: "syncing file system changes",
                source: WaitError::Cancelled,
            });
        }
        finished = task => finished,
    };
    let (communicator, result) = joined.map_err(|err| {
        StepError::Sync(GuestError::Spawn {
            program: SYNC_COMMAND.to_owned(),
            message: err.to_string(),
        })
    })?;
    context.communicator = Some(communicator);
    result
        .and_then(|output| output.into_success(SYNC_COMMAND))
        .map(|_| ())
        .map_err(StepError::Sync)
}

impl Step for SnapshotStep {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn run<'a>(&'a self, context: &'a mut BuildContext) -> StepFuture<'a> {
        Box::pin(async move {
            let result = self.take_snapshot(context).await;
            context.conclude(result)
        })
    }

    fn cleanup<'a>(&'a self, _context: &'a mut BuildContext) -> CleanupFuture<'a> {
        Box::pin(async {})
    }
}
