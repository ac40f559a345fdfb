//! The sync engine: a single tokio task owning every piece of polling state.
//!
//! Commands come in over one channel and `SyncEvent`s go out over another.
//! The task multiplexes four suspension points with `tokio::select!`: the
//! command channel, the in-flight transport future, the next-cycle timer and
//! the placeholder timer. There are no locks; dropping the in-flight future
//! is how a fetch gets cancelled.
//!
//! Per fetch the pipeline is: discard if superseded → deduplicate →
//! consolidate → render → advance and commit the cursor → feed the
//! estimators → schedule the next cycle.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chunksync_core::{
    Chunk, ChunkConsolidator, Estimator, EstimatorConfig, SequenceDeduplicator, SessionKey,
    SessionStatus, SyncError,
};
use chunksync_link::{Cursor, NetworkQuality, NetworkQualityWindow, NetworkTier, QualityTrend};
use chunksync_scheduler::{
    CyclePlan, FetchTicket, FetchVerdict, PollState, PredictiveScheduler, ProbeVerdict,
    StartOutcome,
};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::events::{SyncEvent, TerminalReason};
use crate::sink::RenderSink;
use crate::transport::ChunkTransport;

// ─── Handle ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sync engine has shut down")]
pub struct EngineClosed;

#[derive(Debug)]
enum Command {
    Start(SessionKey),
    Stop,
    NotifyNewData,
    NotifyReconnected,
    SetNetworkQuality(NetworkQuality),
    Shutdown,
}

/// Control surface of a spawned engine.
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Start polling `key`. No-op when already polling it; any other key is
    /// stopped first.
    pub fn start(&self, key: SessionKey) -> Result<(), EngineClosed> {
        self.send(Command::Start(key))
    }

    pub fn stop(&self) -> Result<(), EngineClosed> {
        self.send(Command::Stop)
    }

    /// Push hint from the live channel: poll sooner. Never carries data.
    pub fn notify_new_data(&self) -> Result<(), EngineClosed> {
        self.send(Command::NotifyNewData)
    }

    /// The live channel reconnected: re-fetch with an overlap.
    pub fn notify_reconnected(&self) -> Result<(), EngineClosed> {
        self.send(Command::NotifyReconnected)
    }

    /// Override the built-in round-trip classifier.
    pub fn set_network_quality(
        &self,
        tier: NetworkTier,
        trend: QualityTrend,
    ) -> Result<(), EngineClosed> {
        self.send(Command::SetNetworkQuality(NetworkQuality::new(tier, trend)))
    }

    /// Stop polling, end the task and wait for it.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::warn!("sync engine task failed: {e}");
        }
    }

    fn send(&self, command: Command) -> Result<(), EngineClosed> {
        self.commands.send(command).map_err(|_| EngineClosed)
    }
}

// ─── In-flight work ─────────────────────────────────────────────────

enum Completion {
    Probe {
        ticket: FetchTicket,
        key: SessionKey,
        cursor: Cursor,
        result: Result<SessionStatus, SyncError>,
    },
    Fetch {
        ticket: FetchTicket,
        key: SessionKey,
        rtt_ms: u64,
        result: Result<Vec<Chunk>, SyncError>,
    },
}

enum Wake {
    Command(Option<Command>),
    Completed(Completion),
    CycleDue,
    PlaceholderDue,
}

#[derive(Debug, Default)]
struct Placeholder {
    show_at: Option<Instant>,
    hide_at: Option<Instant>,
    visible: bool,
}

impl Placeholder {
    fn deadline(&self) -> Option<Instant> {
        if self.visible {
            self.hide_at
        } else {
            self.show_at
        }
    }

    fn is_armed(&self) -> bool {
        self.visible || self.show_at.is_some()
    }
}

// ─── Engine ─────────────────────────────────────────────────────────

pub struct SyncEngine<T, S> {
    transport: Arc<T>,
    sink: S,
    config: SyncConfig,

    poll: PollState,
    dedup: SequenceDeduplicator,
    consolidator: ChunkConsolidator,
    predictive: PredictiveScheduler,
    latency: Estimator,
    quality: NetworkQualityWindow,
    quality_override: Option<NetworkQuality>,
    /// Sessions known to be finished. Their dedup entries go once another
    /// key is viewed.
    completed: HashSet<String>,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SyncEvent>,
    epoch: Instant,
    in_flight: Option<BoxFuture<'static, Completion>>,
    next_cycle_at: Option<Instant>,
    /// A push hint arrived while a fetch was in flight.
    nudged: bool,
    placeholder: Placeholder,
}

impl<T, S> SyncEngine<T, S>
where
    T: ChunkTransport + 'static,
    S: RenderSink + 'static,
{
    /// Spawn the engine task on the current tokio runtime.
    pub fn spawn(
        transport: T,
        sink: S,
        config: SyncConfig,
    ) -> (SyncHandle, mpsc::UnboundedReceiver<SyncEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let engine = Self::new(transport, sink, config, command_rx, event_tx);
        let task = tokio::spawn(engine.run());
        (
            SyncHandle {
                commands: command_tx,
                task,
            },
            event_rx,
        )
    }

    fn new(
        transport: T,
        sink: S,
        config: SyncConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            sink,
            poll: PollState::new(
                config.backoff.clone(),
                config.probe.clone(),
                config.max_recovery_rewind_ms,
            ),
            dedup: SequenceDeduplicator::new(),
            consolidator: ChunkConsolidator::new(),
            predictive: PredictiveScheduler::new(config.predictive.clone()),
            latency: Estimator::new(EstimatorConfig::latency()),
            quality: NetworkQualityWindow::new().with_initial_tier(config.initial_tier),
            quality_override: None,
            completed: HashSet::new(),
            commands,
            events,
            epoch: Instant::now(),
            in_flight: None,
            next_cycle_at: None,
            nudged: false,
            placeholder: Placeholder::default(),
            config,
        }
    }

    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                biased;
                command = self.commands.recv() => Wake::Command(command),
                done = poll_in_flight(&mut self.in_flight) => Wake::Completed(done),
                () = sleep_until_opt(self.next_cycle_at) => Wake::CycleDue,
                () = sleep_until_opt(self.placeholder.deadline()) => Wake::PlaceholderDue,
            };

            match wake {
                Wake::Command(None | Some(Command::Shutdown)) => break,
                Wake::Command(Some(command)) => self.handle_command(command),
                Wake::Completed(done) => {
                    self.in_flight = None;
                    self.handle_completion(done);
                }
                Wake::CycleDue => {
                    self.next_cycle_at = None;
                    self.run_cycle();
                }
                Wake::PlaceholderDue => self.on_placeholder_timer(),
            }
        }
        self.stop_polling();
        tracing::debug!("sync engine task exiting");
    }

    // ─── Commands ───────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(key) => self.start(key),
            Command::Stop => self.stop_polling(),
            Command::NotifyNewData => self.nudge(),
            Command::NotifyReconnected => self.recover(),
            Command::SetNetworkQuality(quality) => {
                tracing::info!(tier = %quality.tier, trend = ?quality.trend, "network quality override");
                self.quality_override = Some(quality);
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    fn start(&mut self, key: SessionKey) {
        match self.poll.start(key.clone()) {
            StartOutcome::AlreadyPolling => {
                tracing::debug!("already polling {key}");
                return;
            }
            StartOutcome::Switched { previous } => {
                tracing::info!("switching from {previous} to {key}");
                self.emit(SyncEvent::Stopped {
                    session_id: previous.session_id,
                });
            }
            StartOutcome::Started => {}
        }

        self.disarm();
        self.forget_completed_except(&key.session_id);
        tracing::info!("polling {key}");
        self.emit(SyncEvent::Started {
            session_id: key.session_id,
        });
        self.next_cycle_at = Some(Instant::now());
    }

    fn stop_polling(&mut self) {
        self.disarm();
        if let Some(key) = self.poll.stop() {
            tracing::info!("stopped polling {key}");
            self.emit(SyncEvent::Stopped {
                session_id: key.session_id,
            });
        }
    }

    fn nudge(&mut self) {
        if !self.poll.is_polling() {
            return;
        }
        if self.in_flight.is_some() {
            self.nudged = true;
        } else {
            tracing::debug!("new-data hint: polling now");
            self.next_cycle_at = Some(Instant::now());
        }
    }

    fn recover(&mut self) {
        let Some(key) = self.poll.key().cloned() else {
            return;
        };
        let Some((plan, rewind)) = self.poll.begin_recovery(self.config.recovery_overlap_ms)
        else {
            return;
        };
        tracing::info!(
            from = %rewind.previous_fetched,
            to = %rewind.new_fetched,
            high_water = ?self.dedup.high_water(&key.session_id),
            "recovery fetch for {key}"
        );
        self.launch_fetch(plan.ticket, key, plan.cursor);
    }

    // ─── Cycle ──────────────────────────────────────────────────────

    fn run_cycle(&mut self) {
        let Some(key) = self.poll.key().cloned() else {
            return;
        };
        let Some(plan) = self.poll.begin_cycle() else {
            return;
        };
        tracing::debug!(
            cycle = self.poll.session_check_counter(),
            cursor = %plan.cursor,
            probe = plan.probe,
            "poll cycle for {key}"
        );
        if plan.probe {
            self.launch_probe(plan, key);
        } else {
            self.launch_fetch(plan.ticket, key, plan.cursor);
        }
    }

    fn launch_probe(&mut self, plan: CyclePlan, key: SessionKey) {
        let transport = Arc::clone(&self.transport);
        let limit = self.config.request_timeout();
        let CyclePlan { ticket, cursor, .. } = plan;
        self.next_cycle_at = None;
        self.in_flight = Some(
            async move {
                let result =
                    with_timeout(limit, transport.fetch_session_status(&key.session_id)).await;
                Completion::Probe {
                    ticket,
                    key,
                    cursor,
                    result,
                }
            }
            .boxed(),
        );
    }

    /// Replaces (and thereby cancels) whatever was in flight.
    fn launch_fetch(&mut self, ticket: FetchTicket, key: SessionKey, cursor: Cursor) {
        let transport = Arc::clone(&self.transport);
        let limit = self.config.request_timeout();
        self.next_cycle_at = None;
        self.in_flight = Some(
            async move {
                let started = Instant::now();
                let result = with_timeout(limit, transport.fetch_chunks_since(&key, cursor)).await;
                Completion::Fetch {
                    ticket,
                    key,
                    rtt_ms: millis(started.elapsed()),
                    result,
                }
            }
            .boxed(),
        );
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Probe {
                ticket,
                key,
                cursor,
                result,
            } => self.on_probe(ticket, key, cursor, result),
            Completion::Fetch {
                ticket,
                key,
                rtt_ms,
                result: Ok(chunks),
            } => self.on_fetched(ticket, &key, chunks, rtt_ms),
            Completion::Fetch {
                ticket,
                key,
                result: Err(error),
                ..
            } => self.on_fetch_error(ticket, &key, error),
        }
    }

    fn on_probe(
        &mut self,
        ticket: FetchTicket,
        key: SessionKey,
        cursor: Cursor,
        result: Result<SessionStatus, SyncError>,
    ) {
        match result {
            Ok(status) => match self.poll.on_probe(ticket, status) {
                ProbeVerdict::Stale => tracing::debug!("discarding superseded probe"),
                ProbeVerdict::Continue => {
                    tracing::debug!("session {} is {status}", key.session_id);
                    self.launch_fetch(ticket, key, cursor);
                }
                ProbeVerdict::Terminal(status) => {
                    let reason = if status == SessionStatus::Error {
                        TerminalReason::Errored
                    } else {
                        TerminalReason::Completed
                    };
                    self.finish(&key, reason);
                }
            },
            Err(e) if !self.poll.is_current(ticket) => {
                tracing::debug!("discarding superseded probe error: {e}");
            }
            Err(SyncError::RateLimited { retry_after_ms }) => {
                self.finish(&key, TerminalReason::RateLimited { retry_after_ms });
            }
            Err(e) => {
                tracing::warn!("status probe failed for {key}: {e}");
                self.launch_fetch(ticket, key, cursor);
            }
        }
    }

    fn on_fetched(&mut self, ticket: FetchTicket, key: &SessionKey, raw: Vec<Chunk>, rtt_ms: u64) {
        if !self.poll.is_current(ticket) {
            tracing::debug!("discarding superseded fetch of {} chunks", raw.len());
            return;
        }
        let now_ms = self.now_ms();
        let newest = Cursor::newest_in(&raw);
        let fetched = raw.len();
        let fresh = self.dedup.filter_batch(raw);
        let count = fresh.len();

        let mut rendered = 0;
        if count > 0 {
            let consolidation = self.consolidator.consolidate(fresh);
            for item in &consolidation.chunks {
                if self.sink.render(item).is_none() {
                    tracing::debug!(sequence = ?item.chunk.sequence, "render sink declined chunk");
                }
            }
            rendered = consolidation.chunks.len();
            let stats = consolidation.stats;
            if rendered < count {
                tracing::debug!(
                    text_merged = stats.text_merged,
                    tools_collapsed = stats.tools_collapsed,
                    system_superseded = stats.system_superseded,
                    "consolidated {count} chunks into {rendered}"
                );
            }
        }

        let latency = self.latency.update(rtt_ms as f64);
        self.quality.record(rtt_ms, now_ms);
        let baseline_ms = self.baseline_ms(now_ms);

        let verdict = self.poll.on_fetch_success(ticket, count, newest, baseline_ms);
        if let Err(e) = self.poll.commit_fetched() {
            tracing::warn!("cursor watermark commit error: {e}");
        }

        let delay_ms = match verdict {
            FetchVerdict::Progress { delay_ms } => {
                self.predictive
                    .record_arrival_at(now_ms, newest.map(Cursor::as_millis));
                self.clear_placeholder();
                let last_sequence = self.dedup.high_water(&key.session_id);
                tracing::debug!(
                    fetched,
                    applied = count,
                    rendered,
                    cursor = %self.poll.cursor().fetched,
                    latency_ms = latency.estimate.round(),
                    "applied chunks for {key}"
                );
                self.emit(SyncEvent::ChunksApplied {
                    session_id: key.session_id.clone(),
                    count,
                    rendered,
                    last_sequence,
                });
                delay_ms
            }
            FetchVerdict::Empty {
                delay_ms,
                empty_polls,
            } => {
                let missed = self.predictive.record_empty_poll(now_ms);
                tracing::debug!(fetched, empty_polls, missed, "nothing new for {key}");
                delay_ms
            }
            FetchVerdict::Stale | FetchVerdict::Retry { .. } => return,
        };

        let delay_ms = self.predicted_delay_ms(now_ms, latency.estimate, delay_ms);
        self.arm_placeholder(now_ms);
        self.schedule(delay_ms);
    }

    fn on_fetch_error(&mut self, ticket: FetchTicket, key: &SessionKey, error: SyncError) {
        if !self.poll.is_current(ticket) {
            tracing::debug!("discarding superseded fetch error: {error}");
            return;
        }
        if let SyncError::RateLimited { retry_after_ms } = error {
            self.finish(key, TerminalReason::RateLimited { retry_after_ms });
            return;
        }

        let now_ms = self.now_ms();
        self.quality.record_failure(now_ms);
        let FetchVerdict::Retry { delay_ms, attempt } = self.poll.on_fetch_failure(ticket) else {
            return;
        };
        tracing::warn!(attempt, retry_in_ms = delay_ms, "fetch failed for {key}: {error}");
        self.emit(SyncEvent::FetchFailed {
            attempt,
            retry_in_ms: delay_ms,
            error: error.to_string(),
        });
        self.schedule(delay_ms);
    }

    /// Polling ended on its own: exactly one terminal event.
    fn finish(&mut self, key: &SessionKey, reason: TerminalReason) {
        self.disarm();
        self.poll.stop();
        match reason {
            TerminalReason::RateLimited { .. } => tracing::warn!("{key}: {reason}, polling stopped"),
            TerminalReason::Completed | TerminalReason::Errored => {
                self.completed.insert(key.session_id.clone());
                tracing::info!("{key}: {reason}");
            }
        }
        self.emit(SyncEvent::Terminal {
            session_id: key.session_id.clone(),
            reason,
        });
    }

    // ─── Scheduling ─────────────────────────────────────────────────

    fn schedule(&mut self, delay_ms: u64) {
        let delay_ms = if std::mem::take(&mut self.nudged) {
            0
        } else {
            delay_ms
        };
        self.next_cycle_at = Some(Instant::now() + Duration::from_millis(delay_ms));
    }

    /// A confident arrival prediction replaces the tier/backoff delay, in
    /// either direction. It never goes below one estimated round trip.
    fn predicted_delay_ms(&self, now_ms: u64, latency_ms: f64, fallback_ms: u64) -> u64 {
        match self.predictive.poll_delay_hint(now_ms) {
            Some(hint) => {
                let floor_ms = if latency_ms.is_finite() && latency_ms > 0.0 {
                    latency_ms.round() as u64
                } else {
                    0
                };
                let delay_ms = hint.max(floor_ms);
                tracing::trace!(
                    hint_ms = hint,
                    floor_ms,
                    fallback_ms,
                    "poll timed off predicted arrival"
                );
                delay_ms
            }
            None => fallback_ms,
        }
    }

    fn baseline_ms(&mut self, now_ms: u64) -> u64 {
        let quality = match self.quality_override {
            Some(quality) => quality,
            None => self.quality.evaluate(now_ms),
        };
        self.config.intervals.baseline(quality)
    }

    /// Drop in-flight work and every timer.
    fn disarm(&mut self) {
        self.in_flight = None;
        self.next_cycle_at = None;
        self.nudged = false;
        self.clear_placeholder();
        self.predictive.reset();
    }

    fn forget_completed_except(&mut self, viewed: &str) {
        let dedup = &mut self.dedup;
        self.completed.retain(|session_id| {
            if session_id == viewed {
                return true;
            }
            dedup.forget_session(session_id);
            tracing::debug!("forgot dedup index of finished session {session_id}");
            false
        });
    }

    // ─── Placeholder ────────────────────────────────────────────────

    fn arm_placeholder(&mut self, now_ms: u64) {
        if self.placeholder.is_armed() {
            return;
        }
        if let Some(plan) = self
            .predictive
            .placeholder_plan(now_ms, self.sink.is_near_bottom())
        {
            self.placeholder.show_at = Some(self.instant_at(plan.show_at_ms));
            self.placeholder.hide_at = Some(self.instant_at(plan.hide_at_ms));
        }
    }

    fn on_placeholder_timer(&mut self) {
        if self.placeholder.visible {
            tracing::debug!("placeholder timed out");
            self.clear_placeholder();
        } else if self.placeholder.show_at.take().is_some() {
            self.sink.show_placeholder();
            self.placeholder.visible = true;
        }
    }

    fn clear_placeholder(&mut self) {
        if self.placeholder.visible {
            self.sink.clear_placeholder();
        }
        self.placeholder = Placeholder::default();
    }

    // ─── Clock ──────────────────────────────────────────────────────

    fn now_ms(&self) -> u64 {
        millis(self.epoch.elapsed())
    }

    fn instant_at(&self, ms: u64) -> Instant {
        self.epoch + Duration::from_millis(ms)
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn with_timeout<R>(
    limit: Duration,
    fut: impl Future<Output = Result<R, SyncError>>,
) -> Result<R, SyncError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(SyncError::Timeout(limit)))
}

async fn poll_in_flight(slot: &mut Option<BoxFuture<'static, Completion>>) -> Completion {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
