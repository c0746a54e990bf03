use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "castforge")]
#[command(author, version, about = "Self-hosted live broadcast server")]
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
    /// Start the broadcast server
    Start {
        /// Host for the HTTP server (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port for the HTTP server (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Port for inbound broadcasts (overrides config)
        #[arg(long)]
        ingest_port: Option<u16>,
    },

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
