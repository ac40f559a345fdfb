//! `chunksync follow`: run the engine against the HTTP server and stream the
//! transcript to stdout.

use anyhow::Context;
use chunksync_core::SessionKey;
use chunksync_runtime::{HttpTransport, SyncConfig, SyncEngine, SyncEvent, TerminalSink};
use tokio::sync::mpsc;

use crate::cli::FollowOpts;

/// Returns the process exit code: 0 on completion or interrupt, 1 when the
/// session errored, the server rate-limited us, or the engine died.
pub async fn cmd_follow(server: &str, opts: FollowOpts) -> anyhow::Result<i32> {
    let mut config = match &opts.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(tier) = opts.tier {
        config.initial_tier = tier;
    }
    if let Some(ms) = opts.timeout_ms {
        config.request_timeout_ms = ms;
    }

    let transport = HttpTransport::new(server, config.request_timeout())
        .with_context(|| format!("cannot use server {server}"))?;
    let key = SessionKey::new(opts.conversation, opts.session);

    let (handle, mut events) = SyncEngine::spawn(transport, TerminalSink::stdout(), config);
    handle.start(key)?;

    let exit_code = tokio::select! {
        code = wait_for_terminal(&mut events) => code,
        () = shutdown_signal() => 0,
    };
    handle.shutdown().await;
    Ok(exit_code)
}

async fn wait_for_terminal(events: &mut mpsc::UnboundedReceiver<SyncEvent>) -> i32 {
    while let Some(event) = events.recv().await {
        if let SyncEvent::Terminal { session_id, reason } = event {
            if reason.is_success() {
                tracing::info!("{session_id}: {reason}");
                return 0;
            }
            tracing::error!("{session_id}: {reason}");
            return 1;
        }
    }
    tracing::error!("sync engine stopped unexpectedly");
    1
}

/// ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("cannot register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
