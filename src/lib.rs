//! Core library for the snapwright image builder.
//!
//! The crate provisions a disposable server in IONOS Cloud, hands it to
//! provisioning steps, snapshots its boot volume and tears everything else
//! down again. Provider calls go through the [`CloudApi`] trait; every
//! mutating call is confirmed by polling its request status before the
//! pipeline moves on.

pub mod builder;
pub mod cloud;
pub mod config;
pub mod guest;
pub mod pipeline;
pub mod resolve;
pub mod state;
pub mod steps;
pub mod test_support;
pub mod ui;
pub mod wait;

pub use builder::{Artifact, BuildError, Builder};
pub use cloud::{ApiResponse, CloudApi, CloudError, Credentials, HttpCloudApi};
pub use config::{BuilderConfig, ConfigError};
pub use guest::{
    CommandOutput, CommandRunner, Communicator, GuestError, ProcessCommandRunner,
    SshCommunicator, SshSettings,
};
pub use pipeline::{PipelineOutcome, PipelineRun, run_pipeline};
pub use resolve::{ImageResolver, ImageSource};
pub use state::PipelineState;
pub use steps::{BuildContext, Step, StepAction, StepError};
pub use ui::{TracingUi, Ui};
pub use wait::{OperationWaiter, WaitError, WaitOutcome, WaitPolicy};
