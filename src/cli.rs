use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "matchbox")]
#[command(author, version, about = "Match clips and scene switching for robotics events")]
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
    /// Follow the scoring feed, switch scenes and serve match clips
    Start {
        /// Host to bind the clip server to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port for the clip server (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Event code (overrides config)
        #[arg(short, long)]
        event: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Check that ffmpeg can write clips in the configured container
    CheckTools,

    /// List the clips produced for the configured event
    ListClips,

    /// Display version information
    Version,
}
