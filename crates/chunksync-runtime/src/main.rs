//! chunksync: follow a streamed agent transcript from a chunk server.
//! Logs go to stderr; stdout carries only the transcript.

use clap::Parser;

mod cli;
mod cmd_follow;
mod cmd_status;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("CHUNKSYNC_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Follow(opts) => {
            let exit_code = cmd_follow::cmd_follow(&args.server, opts).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        cli::Command::Status(opts) => {
            cmd_status::cmd_status(&args.server, opts).await?;
        }
    }

    Ok(())
}
