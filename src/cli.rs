use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vodforge_common::{AssetId, UserId};

#[derive(Parser)]
#[command(name = "vodforge")]
#[command(author, version, about = "Unattended video publication pipeline")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the job workers until interrupted
    Start,

    /// Re-evaluate one asset and move it forward
    Advance {
        /// Asset to advance
        asset_id: AssetId,
    },

    /// Requeue interrupted jobs and re-advance assets stuck mid-pipeline
    Recover,

    /// Register an uploaded file as a new asset
    Ingest {
        /// Video file to ingest
        file: PathBuf,

        /// Owner of the new asset
        #[arg(long)]
        owner: UserId,

        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Enqueue a job from its JSON payload
    Enqueue {
        /// Payload, e.g. '{"kind":"generate-storyboard","asset_id":"..."}'
        payload: String,
    },

    /// List queued and running jobs
    Jobs {
        /// Also show the most recent failures
        #[arg(long)]
        failed: bool,

        /// Maximum jobs listed per status
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Retry file deletions that failed earlier
    PurgeRemovals,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
