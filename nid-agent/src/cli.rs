use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nid-agent")]
#[command(about = "Mint session cookies and install them into private cookie jars")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "NID_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mint one token and print it
    Fetch,

    /// Run one install pass over the private jars
    Install {
        /// Overwrite tokens already present
        #[arg(short, long)]
        force: bool,
    },

    /// Re-read the private permission, installing on a transition to allowed
    Startup,

    /// Show the persisted state
    Status,
}
