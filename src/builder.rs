//! Builder entry point: assembles the pipeline and produces the artifact.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cloud::{CloudApi, CloudError, HttpCloudApi};
use crate::config::{BuilderConfig, ConfigError};
use crate::guest::ProcessCommandRunner;
use crate::pipeline::{PipelineOutcome, run_pipeline};
use crate::steps::{BuildContext, ConnectStep, CreateServerStep, SnapshotStep, Step};
use crate::ui::Ui;

const SSH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Snapshot produced by a successful build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Artifact {
    /// Snapshot name.
    pub snapshot_name: String,
    /// Region the snapshot lives in.
    pub region: String,
    /// Pipeline values for downstream templating, as they stood before
    /// the build server was torn down.
    pub exports: BTreeMap<&'static str, String>,
}

impl fmt::Display for Artifact {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "A snapshot was created: '{}' in '{}'",
            self.snapshot_name, self.region
        )
    }
}

/// Errors returned by [`Builder::run`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The API client could not be created.
    #[error("failed to create API client: {0}")]
    Client(#[from] CloudError),
    /// A step halted the pipeline.
    #[error("build halted in step {step}: {message}")]
    Halted {
        /// Halting step.
        step: &'static str,
        /// Error recorded by the step.
        message: String,
    },
    /// The run was cancelled.
    #[error("build cancelled")]
    Cancelled,
    /// The pipeline completed without naming a snapshot.
    #[error("build finished without producing a snapshot")]
    MissingArtifact,
}

/// Builds a snapshot from a disposable server.
///
/// Steps run as `create-server`, the connector (if any), the provisioners in
/// registration order, then `snapshot`.
pub struct Builder {
    config: BuilderConfig,
    api: Arc<dyn CloudApi>,
    ui: Arc<dyn Ui>,
    connector: Option<Box<dyn Step>>,
    provisioners: Vec<Box<dyn Step>>,
}

impl Builder {
    /// Creates a builder around an existing API client. No connector is
    /// installed.
    #[must_use]
    pub fn new(config: BuilderConfig, api: Arc<dyn CloudApi>, ui: Arc<dyn Ui>) -> Self {
        Self {
            config,
            api,
            ui,
            connector: None,
            provisioners: Vec::new(),
        }
    }

    /// Creates a builder talking to the configured endpoint over HTTP and
    /// reaching the server through the system SSH client.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] when credentials are missing and
    /// [`BuildError::Client`] when the HTTP client cannot be built.
    pub fn from_config(config: BuilderConfig, ui: Arc<dyn Ui>) -> Result<Self, BuildError> {
        let api = HttpCloudApi::new(&config.api_url, config.credentials()?)?;
        let connector = ConnectStep::new(
            ProcessCommandRunner,
            config.ssh_settings(),
            config.ssh_timeout(),
            SSH_POLL_INTERVAL,
        );
        Ok(Self::new(config, Arc::new(api), ui).with_connector(Box::new(connector)))
    }

    /// Sets the step that installs the guest communicator.
    #[must_use]
    pub fn with_connector(mut self, connector: Box<dyn Step>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Appends a provisioning step run between connection and snapshot.
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Box<dyn Step>) -> Self {
        self.provisioners.push(provisioner);
        self
    }

    /// Runs the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] before any provider call when the
    /// configuration is invalid, [`BuildError::Halted`] with the recorded
    /// step error, [`BuildError::Cancelled`] when `cancel` fired, and
    /// [`BuildError::MissingArtifact`] when no snapshot was recorded.
    pub async fn run(self, cancel: CancellationToken) -> Result<Artifact, BuildError> {
        let spec = self.config.server_spec()?;
        let snapshot_name = spec.name.clone();
        let region = spec.region.clone();
        info!(snapshot = %snapshot_name, %region, "starting build");

        let mut steps: Vec<Box<dyn Step>> = vec![Box::new(CreateServerStep::new(
            Arc::clone(&self.api),
            spec,
            self.config.resource_policy(),
        ))];
        steps.extend(self.connector);
        steps.extend(self.provisioners);
        steps.push(Box::new(SnapshotStep::new(
            Arc::clone(&self.api),
            snapshot_name,
            self.config.snapshot_policy(),
        )));

        let mut context = BuildContext::new(self.ui, cancel);
        let run = run_pipeline(&steps, &mut context).await;
        let state = context.state;

        match run.outcome {
            PipelineOutcome::Cancelled => Err(BuildError::Cancelled),
            PipelineOutcome::Halted { .. } if context.cancel.is_cancelled() => {
                Err(BuildError::Cancelled)
            }
            PipelineOutcome::Halted { step } => Err(BuildError::Halted {
                step,
                message: state.error.clone().unwrap_or_default(),
            }),
            PipelineOutcome::Completed => {
                let snapshot_name = state.snapshot_name.ok_or(BuildError::MissingArtifact)?;
                Ok(Artifact {
                    snapshot_name,
                    region,
                    exports: run.exports,
                })
            }
        }
    }
}

