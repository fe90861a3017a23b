//! Binary entry point for the snapwright CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use snapwright::{Artifact, BuildError, Builder, BuilderConfig, TracingUi};

mod cli;

use cli::{BuildCommand, Cli};

const LOG_ENV: &str = "SNAPWRIGHT_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Build(command) => build(command).await,
    }
}

async fn build(args: BuildCommand) -> Result<(), CliError> {
    let mut config =
        BuilderConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    apply_overrides(&mut config, &args);

    let builder = Builder::from_config(config, Arc::new(TracingUi))?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let artifact = builder.run(cancel).await?;
    write_artifact(io::stdout(), &artifact, args.exports)?;
    Ok(())
}

fn apply_overrides(config: &mut BuilderConfig, args: &BuildCommand) {
    if let Some(image) = &args.image {
        config.image.clone_from(image);
    }
    if let Some(region) = &args.region {
        config.region.clone_from(region);
    }
    if let Some(name) = &args.snapshot_name {
        config.snapshot_name.clone_from(name);
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build and cleaning up");
            cancel.cancel();
        }
    });
}

fn write_artifact(mut target: impl Write, artifact: &Artifact, exports: bool) -> io::Result<()> {
    writeln!(target, "{artifact}")?;
    if exports {
        for (key, value) in &artifact.exports {
            writeln!(target, "{key}={value}")?;
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn artifact() -> Artifact {
        Artifact {
            snapshot_name: String::from("golden-debian"),
            region: String::from("de/txl"),
            exports: BTreeMap::from([
                ("datacenter_id", String::from("dc-1")),
                ("snapshot_name", String::from("golden-debian")),
            ]),
        }
    }

    #[test]
    fn write_artifact_prints_summary_line() {
        let mut buffer = Vec::new();
        write_artifact(&mut buffer, &artifact(), false).expect("write artifact");
        assert_eq!(
            String::from_utf8_lossy(&buffer),
            "A snapshot was created: 'golden-debian' in 'de/txl'\n"
        );
    }

    #[test]
    fn write_artifact_appends_exports_on_request() {
        let mut buffer = Vec::new();
        write_artifact(&mut buffer, &artifact(), true).expect("write artifact");
        let rendered = String::from_utf8_lossy(&buffer);
        assert!(rendered.ends_with("datacenter_id=dc-1\nsnapshot_name=golden-debian\n"));
    }

    #[test]
    fn write_error_renders_message() {
        let mut buffer = Vec::new();
        write_error(&mut buffer, &CliError::Build(BuildError::Cancelled));
        assert_eq!(String::from_utf8_lossy(&buffer), "build cancelled\n");
    }
}
