//! CLI definition using clap derive.

use std::path::PathBuf;

use chunksync_link::NetworkTier;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chunksync", about = "Follow a streamed agent transcript from a chunk server")]
pub struct Cli {
    /// Chunk server base URL
    #[arg(
        long,
        global = true,
        env = "CHUNKSYNC_SERVER",
        default_value = "http://127.0.0.1:8080"
    )]
    pub server: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stream a session's transcript to stdout until it finishes
    Follow(FollowOpts),
    /// Print a session's status once
    Status(StatusOpts),
}

#[derive(clap::Args)]
pub struct FollowOpts {
    /// Conversation id
    #[arg(long, short = 'c')]
    pub conversation: String,

    /// Session id within the conversation
    #[arg(long, short = 's')]
    pub session: String,

    /// JSON file overriding engine defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Network tier assumed before round trips are measured
    /// (excellent, good, fair, poor, bad)
    #[arg(long)]
    pub tier: Option<NetworkTier>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    /// Session id
    #[arg(long, short = 's')]
    pub session: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "10000")]
    pub timeout_ms: u64,
}
