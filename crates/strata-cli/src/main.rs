//! Strata CLI - operator front end for a strata model store.
//!
//! Every subcommand works on one storage root and prints its result as JSON
//! on stdout; logs go to stderr.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Validate, install and manage on-device model artifacts")]
#[command(version)]
struct Args {
    /// Storage root (defaults to the platform data directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the format of a model file or directory
    Detect { path: PathBuf },

    /// Compute a file digest, optionally comparing it with an expected value
    Checksum {
        path: PathBuf,
        #[arg(short, long, default_value = "sha256")]
        algorithm: String,
        #[arg(short, long)]
        expected: Option<String>,
    },

    /// Validate an artifact against a descriptor JSON file
    Validate { descriptor: PathBuf, path: PathBuf },

    /// Install a model from a local artifact or its download URL
    Install {
        descriptor: PathBuf,
        /// Local artifact to adopt; the descriptor must set `is_local`
        #[arg(long)]
        from: Option<PathBuf>,
        /// Replace an existing install
        #[arg(long)]
        replace: bool,
    },

    /// Remove an installed model
    Uninstall { model_id: String },

    /// List installed models
    List,

    /// Report storage usage and current alerts
    Storage,

    /// Reclaim space
    Cleanup {
        /// Escalate until this many bytes are free
        #[arg(long)]
        target: Option<u64>,
        /// Allow a full cache clear when escalating
        #[arg(long)]
        full: bool,
    },

    /// Run the storage monitor until interrupted
    Monitor {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let root = match args.root {
        Some(root) => root,
        None => dirs::data_local_dir()
            .map(|dir| dir.join("strata"))
            .context("Could not determine a data directory; pass --root")?,
    };
    debug!(root = %root.display(), "Using storage root");

    commands::run(args.command, root).await
}
