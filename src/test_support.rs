//! Test doubles shared across unit and integration tests.
//!
//! [`ScriptedCloud`] answers every [`CloudApi`] call from a per-method FIFO
//! queue and records the calls it received. [`ScriptedRunner`] and
//! [`ScriptedCommunicator`] do the same for local processes and guest
//! commands, and [`RecordingUi`] captures operator messages.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::future::ready;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cloud::types::{
    Datacenter, DatacenterId, DatacenterRequest, Image, Lan, LanId, LanRequest, Location, Nic,
    NicId, OperationHandle, RequestStatus, RequestStatusMetadata, Server, ServerId,
    ServerRequest, Snapshot, SnapshotId, SnapshotRequest, Volume, VolumeId,
};
use crate::cloud::{ApiResponse, CloudApi, CloudError, CloudFuture};
use crate::guest::{CommandOutput, CommandRunner, Communicator, GuestError};
use crate::ui::Ui;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

type Reply<T> = Result<ApiResponse<T>, CloudError>;

/// Call received by [`ScriptedCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloudCall {
    /// `create_datacenter` with the requested name and location.
    CreateDatacenter {
        /// Requested name.
        name: String,
        /// Requested region.
        location: String,
    },
    /// `delete_datacenter`.
    DeleteDatacenter(DatacenterId),
    /// `create_server` with the full request.
    CreateServer(DatacenterId, Box<ServerRequest>),
    /// `find_server`.
    FindServer(DatacenterId, ServerId),
    /// `create_lan` with the requested public flag.
    CreateLan {
        /// Owning data center.
        datacenter: DatacenterId,
        /// Whether the LAN is public.
        public: bool,
    },
    /// `attach_nic`.
    AttachNic(DatacenterId, LanId, NicId),
    /// `find_volume`.
    FindVolume(DatacenterId, VolumeId),
    /// `create_snapshot` with the requested name.
    CreateSnapshot(DatacenterId, VolumeId, String),
    /// `find_snapshot`.
    FindSnapshot(SnapshotId),
    /// `request_status`.
    RequestStatus(OperationHandle),
    /// `list_images`.
    ListImages,
    /// `find_location`.
    FindLocation(String),
}

#[derive(Default)]
struct Script {
    calls: Vec<CloudCall>,
    create_datacenter: VecDeque<Reply<Datacenter>>,
    delete_datacenter: VecDeque<Reply<()>>,
    create_server: VecDeque<Reply<Server>>,
    find_server: VecDeque<Reply<Server>>,
    create_lan: VecDeque<Reply<Lan>>,
    attach_nic: VecDeque<Reply<Nic>>,
    find_volume: VecDeque<Reply<Volume>>,
    create_snapshot: VecDeque<Reply<Snapshot>>,
    find_snapshot: VecDeque<Reply<Snapshot>>,
    request_status: VecDeque<Reply<RequestStatus>>,
    list_images: VecDeque<Reply<Vec<Image>>>,
    find_location: VecDeque<Reply<Location>>,
}

/// Scripted [`CloudApi`] double.
///
/// Cloning shares the script, so a test can keep a handle for assertions
/// after moving the double into the code under test. A call with nothing
/// queued fails with a transport error naming the method.
#[derive(Clone, Default)]
pub struct ScriptedCloud {
    script: Arc<Mutex<Script>>,
}

macro_rules! scripted {
    ($(#[$meta:meta])* $push:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $push(&self, reply: Result<ApiResponse<$ty>, CloudError>) -> &Self {
            lock(&self.script).$field.push_back(reply);
            self
        }
    };
}

impl ScriptedCloud {
    /// Creates a double with empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    scripted!(
        /// Queues a `create_datacenter` reply.
        push_create_datacenter, create_datacenter, Datacenter
    );
    scripted!(
        /// Queues a `delete_datacenter` reply.
        push_delete_datacenter, delete_datacenter, ()
    );
    scripted!(
        /// Queues a `create_server` reply.
        push_create_server, create_server, Server
    );
    scripted!(
        /// Queues a `find_server` reply.
        push_find_server, find_server, Server
    );
    scripted!(
        /// Queues a `create_lan` reply.
        push_create_lan, create_lan, Lan
    );
    scripted!(
        /// Queues an `attach_nic` reply.
        push_attach_nic, attach_nic, Nic
    );
    scripted!(
        /// Queues a `find_volume` reply.
        push_find_volume, find_volume, Volume
    );
    scripted!(
        /// Queues a `create_snapshot` reply.
        push_create_snapshot, create_snapshot, Snapshot
    );
    scripted!(
        /// Queues a `find_snapshot` reply.
        push_find_snapshot, find_snapshot, Snapshot
    );
    scripted!(
        /// Queues a `request_status` reply.
        push_request_status, request_status, RequestStatus
    );
    scripted!(
        /// Queues a `list_images` reply.
        push_list_images, list_images, Vec<Image>
    );
    scripted!(
        /// Queues a `find_location` reply.
        push_find_location, find_location, Location
    );

    /// Queues a successful request-status reply with the given status.
    pub fn push_status(&self, status: &str) -> &Self {
        self.push_request_status(Ok(ApiResponse::ok(request_status(status, None))))
    }

    /// Queues `count` identical request-status replies.
    pub fn push_statuses(&self, status: &str, count: usize) -> &Self {
        for _ in 0..count {
            self.push_status(status);
        }
        self
    }

    /// Returns every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        lock(&self.script).calls.clone()
    }

    /// Returns how many received calls satisfy `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&CloudCall) -> bool) -> usize {
        lock(&self.script)
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    fn answer<T: Send + 'static>(
        &self,
        call: CloudCall,
        method: &str,
        select: impl FnOnce(&mut Script) -> &mut VecDeque<Reply<T>>,
    ) -> CloudFuture<'static, T> {
        let mut script = lock(&self.script);
        script.calls.push(call);
        let reply = select(&mut *script).pop_front().unwrap_or_else(|| {
            Err(CloudError::Transport {
                message: format!("no scripted response for {method}"),
            })
        });
        Box::pin(ready(reply))
    }
}

impl CloudApi for ScriptedCloud {
    fn create_datacenter<'a>(
        &'a self,
        request: &'a DatacenterRequest,
    ) -> CloudFuture<'a, Datacenter> {
        let call = CloudCall::CreateDatacenter {
            name: request.properties.name.clone(),
            location: request.properties.location.clone(),
        };
        self.answer(call, "create_datacenter", |script| {
            &mut script.create_datacenter
        })
    }

    fn delete_datacenter<'a>(&'a self, datacenter: &'a DatacenterId) -> CloudFuture<'a, ()> {
        self.answer(
            CloudCall::DeleteDatacenter(datacenter.clone()),
            "delete_datacenter",
            |script| &mut script.delete_datacenter,
        )
    }

    fn create_server<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        request: &'a ServerRequest,
    ) -> CloudFuture<'a, Server> {
        self.answer(
            CloudCall::CreateServer(datacenter.clone(), Box::new(request.clone())),
            "create_server",
            |script| &mut script.create_server,
        )
    }

    fn find_server<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        server: &'a ServerId,
    ) -> CloudFuture<'a, Server> {
        self.answer(
            CloudCall::FindServer(datacenter.clone(), server.clone()),
            "find_server",
            |script| &mut script.find_server,
        )
    }

    fn create_lan<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        request: &'a LanRequest,
    ) -> CloudFuture<'a, Lan> {
        let call = CloudCall::CreateLan {
            datacenter: datacenter.clone(),
            public: request.properties.public,
        };
        self.answer(call, "create_lan", |script| &mut script.create_lan)
    }

    fn attach_nic<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        lan: &'a LanId,
        nic: &'a NicId,
    ) -> CloudFuture<'a, Nic> {
        self.answer(
            CloudCall::AttachNic(datacenter.clone(), lan.clone(), nic.clone()),
            "attach_nic",
            |script| &mut script.attach_nic,
        )
    }

    fn find_volume<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        volume: &'a VolumeId,
    ) -> CloudFuture<'a, Volume> {
        self.answer(
            CloudCall::FindVolume(datacenter.clone(), volume.clone()),
            "find_volume",
            |script| &mut script.find_volume,
        )
    }

    fn create_snapshot<'a>(
        &'a self,
        datacenter: &'a DatacenterId,
        volume: &'a VolumeId,
        request: &'a SnapshotRequest,
    ) -> CloudFuture<'a, Snapshot> {
        self.answer(
            CloudCall::CreateSnapshot(datacenter.clone(), volume.clone(), request.name.clone()),
            "create_snapshot",
            |script| &mut script.create_snapshot,
        )
    }

    fn find_snapshot<'a>(&'a self, snapshot: &'a SnapshotId) -> CloudFuture<'a, Snapshot> {
        self.answer(
            CloudCall::FindSnapshot(snapshot.clone()),
            "find_snapshot",
            |script| &mut script.find_snapshot,
        )
    }

    fn request_status<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> CloudFuture<'a, RequestStatus> {
        self.answer(
            CloudCall::RequestStatus(handle.clone()),
            "request_status",
            |script| &mut script.request_status,
        )
    }

    fn list_images(&self) -> CloudFuture<'_, Vec<Image>> {
        self.answer(CloudCall::ListImages, "list_images", |script| {
            &mut script.list_images
        })
    }

    fn find_location<'a>(&'a self, region: &'a str) -> CloudFuture<'a, Location> {
        self.answer(
            CloudCall::FindLocation(region.to_owned()),
            "find_location",
            |script| &mut script.find_location,
        )
    }
}

/// Builds a request-status body.
#[must_use]
pub fn request_status(status: &str, message: Option<&str>) -> RequestStatus {
    RequestStatus {
        metadata: RequestStatusMetadata {
            status: status.to_owned(),
            message: message.map(str::to_owned),
        },
    }
}

/// Message captured by [`RecordingUi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UiMessage {
    /// Progress message.
    Say(String),
    /// Error message.
    Error(String),
}

/// [`Ui`] that records every message.
#[derive(Clone, Debug, Default)]
pub struct RecordingUi {
    messages: Arc<Mutex<Vec<UiMessage>>>,
}

impl RecordingUi {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded message in order.
    #[must_use]
    pub fn messages(&self) -> Vec<UiMessage> {
        lock(&self.messages).clone()
    }

    /// Returns the recorded error messages.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        lock(&self.messages)
            .iter()
            .filter_map(|message| match message {
                UiMessage::Error(text) => Some(text.clone()),
                UiMessage::Say(_) => None,
            })
            .collect()
    }

    /// Returns `true` when a progress message equal to `text` was recorded.
    #[must_use]
    pub fn said(&self, text: &str) -> bool {
        lock(&self.messages)
            .iter()
            .any(|message| matches!(message, UiMessage::Say(said) if said == text))
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        lock(&self.messages).push(UiMessage::Say(message.to_owned()));
    }

    fn error(&self, message: &str) {
        lock(&self.messages).push(UiMessage::Error(message.to_owned()));
    }
}

/// Scripted [`Communicator`] that returns queued outputs in FIFO order and
/// records the commands it received. An empty queue answers with success.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCommunicator {
    responses: Arc<Mutex<VecDeque<Result<CommandOutput, GuestError>>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedCommunicator {
    /// Creates a communicator with no queued outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn push(&self, reply: Result<CommandOutput, GuestError>) {
        lock(&self.responses).push_back(reply);
    }

    /// Queues an exit code with stderr text.
    pub fn push_exit_code(&self, code: i32, stderr: &str) {
        self.push(Ok(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_owned(),
        }));
    }

    /// Returns every command executed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

impl Communicator for ScriptedCommunicator {
    fn execute(&self, command: &str) -> Result<CommandOutput, GuestError> {
        lock(&self.commands).push(command.to_owned());
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            Ok(CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_exit_code(0);
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        lock(&self.responses).push_back(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, GuestError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| GuestError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}
