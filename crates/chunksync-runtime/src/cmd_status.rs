//! `chunksync status`: a single status probe.

use std::time::Duration;

use anyhow::Context;
use chunksync_runtime::{ChunkTransport, HttpTransport};

use crate::cli::StatusOpts;

pub async fn cmd_status(server: &str, opts: StatusOpts) -> anyhow::Result<()> {
    let transport = HttpTransport::new(server, Duration::from_millis(opts.timeout_ms))
        .with_context(|| format!("cannot use server {server}"))?;
    let status = transport
        .fetch_session_status(&opts.session)
        .await
        .with_context(|| format!("status probe for {} failed", opts.session))?;
    println!("{status}");
    Ok(())
}
