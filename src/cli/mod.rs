//! Command-line interface definitions for the `snapwright` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `snapwright` binary.
#[derive(Debug, Parser)]
#[command(
    name = "snapwright",
    about = "Build a reusable IONOS Cloud snapshot from a disposable server",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision a server, snapshot its boot volume, and tear it down.
    #[command(
        name = "build",
        about = "Provision a server, snapshot its boot volume, and tear it down"
    )]
    Build(BuildCommand),
}

/// Arguments for the `snapwright build` subcommand.
///
/// Every other setting comes from `IONOS_*` environment variables or
/// `snapwright.toml`.
#[derive(Debug, Parser)]
pub(crate) struct BuildCommand {
    /// Override the image name or alias for this build.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Override the region for this build, for example `de/txl`.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Override the snapshot name for this build.
    #[arg(long, value_name = "NAME")]
    pub(crate) snapshot_name: Option<String>,
    /// Print the pipeline exports as `key=value` lines after the artifact.
    #[arg(long)]
    pub(crate) exports: bool,
}
