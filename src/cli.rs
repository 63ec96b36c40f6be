//! CLI argument definitions using clap with subcommand architecture

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ClientConfig;

/// Client for a live code-analysis server
#[derive(Parser, Debug)]
#[command(name = "probe-sync")]
#[command(about = "Talk to a code-analysis server over WebSocket or HTTP long-poll")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "PROBE_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default request deadline in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// ============================================
// Main Commands Enum
// ============================================

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask the server which transport to use
    Discover(ServerArgs),

    /// Send one request and print the reply
    Call(CallArgs),

    /// Stream worker status updates
    Workers(WorkersArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Server base URL (defaults to `server.url` from the config)
    pub url: Option<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server base URL
    pub url: String,

    /// Request payload as JSON, e.g. '{"type":"Concurrent:StopJob","job":1}'
    pub payload: String,
}

#[derive(Args, Debug)]
pub struct WorkersArgs {
    /// Server base URL
    pub url: Option<String>,

    /// Exit after this many updates
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

impl Cli {
    /// Fold command-line overrides into `config`
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(timeout_ms) = self.timeout_ms {
            config.rpc.timeout_ms = timeout_ms;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        let url = match &self.command {
            Commands::Discover(args) => args.url.as_ref(),
            Commands::Call(args) => Some(&args.url),
            Commands::Workers(args) => args.url.as_ref(),
        };
        if let Some(url) = url {
            config.server.url = url.clone();
        }
    }
}
