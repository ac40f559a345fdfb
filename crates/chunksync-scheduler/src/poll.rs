//! Polling state machine for one session key.
//!
//! `Idle → Polling → Idle`. While polling, each cycle is planned with
//! `begin_cycle` (optionally probing session status first), and the outcome
//! of its fetch is reported back with `on_fetch_success` /
//! `on_fetch_failure`. The returned delay is when the next cycle is due.
//!
//! Every fetch carries a `FetchTicket`. Issuing a new ticket supersedes the
//! previous one, and outcomes for anything but the current ticket are
//! reported as `Stale` and must be discarded by the caller.
//!
//! Pure, deterministic: no clocks, no IO.

use chunksync_core::{SessionKey, SessionStatus};
use chunksync_link::{Cursor, CursorError, CursorWatermarks, RewindResult};
use serde::{Deserialize, Serialize};

use crate::backoff::{Backoff, BackoffPolicy};

// ─── Policy ─────────────────────────────────────────────────────────

/// When to probe session status ahead of a data fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbePolicy {
    /// Probe on every Nth cycle (default 10). 0 disables the modulus rule.
    pub probe_every: u64,
    /// Probe whenever the empty-poll streak reaches a multiple of this
    /// (default 3). 0 disables the streak rule.
    pub empty_probe_threshold: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            probe_every: 10,
            empty_probe_threshold: 3,
        }
    }
}

// ─── Tickets & Outcomes ─────────────────────────────────────────────

/// Identity of one issued fetch or probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Already polling this key; nothing changed.
    AlreadyPolling,
    /// Was polling another key, which has been stopped.
    Switched { previous: SessionKey },
}

/// What the next cycle should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePlan {
    pub ticket: FetchTicket,
    /// Probe session status before fetching.
    pub probe: bool,
    /// Fetch chunks newer than this.
    pub cursor: Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Stale,
    /// Session still running: go on with the data fetch.
    Continue,
    /// Session finished. Polling has been stopped.
    Terminal(SessionStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchVerdict {
    Stale,
    /// New chunks were applied.
    Progress { delay_ms: u64 },
    /// Successful poll, nothing new.
    Empty { delay_ms: u64, empty_polls: u32 },
    /// Failed poll; retry after the backoff delay.
    Retry { delay_ms: u64, attempt: u32 },
}

impl FetchVerdict {
    pub fn delay_ms(self) -> Option<u64> {
        match self {
            Self::Stale => None,
            Self::Progress { delay_ms }
            | Self::Empty { delay_ms, .. }
            | Self::Retry { delay_ms, .. } => Some(delay_ms),
        }
    }
}

// ─── PollState ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PollState {
    key: Option<SessionKey>,
    cursor: CursorWatermarks,
    backoff: Backoff,
    probe_policy: ProbePolicy,
    session_check_counter: u64,
    empty_poll_count: u32,
    current_ticket: Option<FetchTicket>,
    ticket_seq: u64,
}

impl PollState {
    pub fn new(backoff: BackoffPolicy, probe_policy: ProbePolicy, max_rewind_ms: u64) -> Self {
        Self {
            key: None,
            cursor: CursorWatermarks::with_max_rewind(max_rewind_ms),
            backoff: Backoff::new(backoff),
            probe_policy,
            session_check_counter: 0,
            empty_poll_count: 0,
            current_ticket: None,
            ticket_seq: 0,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.key.is_some()
    }

    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Begin polling `key` from the origin cursor. Idempotent for the same
    /// key; a different key stops the current one first.
    pub fn start(&mut self, key: SessionKey) -> StartOutcome {
        if self.key.as_ref() == Some(&key) {
            return StartOutcome::AlreadyPolling;
        }
        let previous = self.stop();
        self.key = Some(key);
        match previous {
            Some(previous) => StartOutcome::Switched { previous },
            None => StartOutcome::Started,
        }
    }

    /// Stop polling and reset every field. Any outstanding ticket becomes
    /// stale. Returns the key that was being polled.
    pub fn stop(&mut self) -> Option<SessionKey> {
        let key = self.key.take();
        self.cursor.reset();
        self.backoff.clear();
        self.session_check_counter = 0;
        self.empty_poll_count = 0;
        self.current_ticket = None;
        key
    }

    /// Plan the next cycle. `None` when not polling.
    pub fn begin_cycle(&mut self) -> Option<CyclePlan> {
        if !self.is_polling() {
            return None;
        }
        self.session_check_counter = self.session_check_counter.saturating_add(1);
        let by_counter = self.probe_policy.probe_every > 0
            && self.session_check_counter % self.probe_policy.probe_every == 0;
        let by_streak = self.probe_policy.empty_probe_threshold > 0
            && self.empty_poll_count > 0
            && self.empty_poll_count % self.probe_policy.empty_probe_threshold == 0;

        Some(CyclePlan {
            ticket: self.issue_ticket(),
            probe: by_counter || by_streak,
            cursor: self.cursor.fetched,
        })
    }

    /// Supersede whatever is in flight.
    pub fn issue_ticket(&mut self) -> FetchTicket {
        self.ticket_seq = self.ticket_seq.wrapping_add(1);
        let ticket = FetchTicket(self.ticket_seq);
        self.current_ticket = Some(ticket);
        ticket
    }

    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        self.is_polling() && self.current_ticket == Some(ticket)
    }

    pub fn in_flight(&self) -> Option<FetchTicket> {
        self.current_ticket
    }

    /// Report a status probe. A terminal status stops polling.
    pub fn on_probe(&mut self, ticket: FetchTicket, status: SessionStatus) -> ProbeVerdict {
        if !self.is_current(ticket) {
            return ProbeVerdict::Stale;
        }
        if status.is_terminal() {
            self.stop();
            return ProbeVerdict::Terminal(status);
        }
        ProbeVerdict::Continue
    }

    /// Report a successful fetch. `new_chunks` counts chunks that survived
    /// deduplication; `newest` is the newest `created_at` in the raw batch.
    pub fn on_fetch_success(
        &mut self,
        ticket: FetchTicket,
        new_chunks: usize,
        newest: Option<Cursor>,
        baseline_ms: u64,
    ) -> FetchVerdict {
        if !self.is_current(ticket) {
            return FetchVerdict::Stale;
        }
        self.current_ticket = None;

        if let Some(newest) = newest.filter(|n| *n > self.cursor.fetched) {
            let advanced = self.cursor.advance_fetched(newest);
            debug_assert!(advanced.is_ok(), "advance past fetched: {advanced:?}");
        }

        if new_chunks > 0 {
            self.empty_poll_count = 0;
            FetchVerdict::Progress {
                delay_ms: self.backoff.reset(baseline_ms),
            }
        } else {
            self.empty_poll_count = self.empty_poll_count.saturating_add(1);
            FetchVerdict::Empty {
                delay_ms: self.backoff.record_empty(baseline_ms),
                empty_polls: self.empty_poll_count,
            }
        }
    }

    /// Report a failed fetch. The cursor is left where it was.
    pub fn on_fetch_failure(&mut self, ticket: FetchTicket) -> FetchVerdict {
        if !self.is_current(ticket) {
            return FetchVerdict::Stale;
        }
        self.current_ticket = None;
        FetchVerdict::Retry {
            delay_ms: self.backoff.record_failure(),
            attempt: self.backoff.consecutive_failures(),
        }
    }

    /// Everything fetched so far has been handed to the render sink.
    pub fn commit_fetched(&mut self) -> Result<(), CursorError> {
        let fetched = self.cursor.fetched;
        self.cursor.commit(fetched)
    }

    /// Prepare an out-of-band recovery fetch: rewind the cursor by
    /// `overlap_ms` behind the committed watermark and supersede the
    /// in-flight fetch. `None` when not polling.
    pub fn begin_recovery(&mut self, overlap_ms: u64) -> Option<(CyclePlan, RewindResult)> {
        if !self.is_polling() {
            return None;
        }
        let rewind = self.cursor.rewind_for_recovery(overlap_ms);
        let plan = CyclePlan {
            ticket: self.issue_ticket(),
            probe: false,
            cursor: self.cursor.fetched,
        };
        Some((plan, rewind))
    }

    pub fn cursor(&self) -> &CursorWatermarks {
        &self.cursor
    }

    pub fn backoff_delay_ms(&self) -> u64 {
        self.backoff.delay_ms()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.consecutive_failures()
    }

    pub fn session_check_counter(&self) -> u64 {
        self.session_check_counter
    }

    pub fn empty_poll_count(&self) -> u32 {
        self.empty_poll_count
    }
}

impl Default for PollState {
    fn default() -> Self {
        Self::new(BackoffPolicy::default(), ProbePolicy::default(), 600_000)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SessionKey {
        SessionKey::new("conv", s)
    }

    fn polling() -> PollState {
        let mut st = PollState::default();
        st.start(key("s"));
        st
    }

    #[test]
    fn start_is_idempotent() {
        let mut st = PollState::default();
        assert_eq!(st.start(key("s")), StartOutcome::Started);
        st.begin_cycle();
        assert_eq!(st.start(key("s")), StartOutcome::AlreadyPolling);
        assert_eq!(st.session_check_counter(), 1, "state untouched");
    }

    #[test]
    fn start_other_key_switches() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        assert_eq!(st.start(key("t")), StartOutcome::Switched { previous: key("s") });
        assert_eq!(st.key(), Some(&key("t")));
        assert!(!st.is_current(plan.ticket), "old fetch superseded");
        assert_eq!(st.session_check_counter(), 0);
    }

    #[test]
    fn idle_plans_nothing() {
        let mut st = PollState::default();
        assert!(st.begin_cycle().is_none());
        assert!(st.begin_recovery(1_000).is_none());
    }

    #[test]
    fn first_cycle_fetches_from_origin() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        assert_eq!(plan.cursor, Cursor::ORIGIN);
        assert!(!plan.probe);
    }

    #[test]
    fn progress_advances_cursor_and_resets_backoff() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_failure(plan.ticket);

        let plan = st.begin_cycle().expect("plan");
        let verdict = st.on_fetch_success(plan.ticket, 3, Some(Cursor(3_000)), 1_000);
        assert_eq!(verdict, FetchVerdict::Progress { delay_ms: 1_000 });
        assert_eq!(st.cursor().fetched, Cursor(3_000));
        assert_eq!(st.backoff_delay_ms(), 1_000);
        assert_eq!(st.consecutive_failures(), 0);

        let next = st.begin_cycle().expect("plan");
        assert_eq!(next.cursor, Cursor(3_000));
    }

    #[test]
    fn cursor_never_moves_backward() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_success(plan.ticket, 1, Some(Cursor(5_000)), 1_000);
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_success(plan.ticket, 1, Some(Cursor(4_000)), 1_000);
        assert_eq!(st.cursor().fetched, Cursor(5_000));
    }

    #[test]
    fn three_empty_polls_force_probe() {
        let mut st = polling();
        for i in 1..=3 {
            let plan = st.begin_cycle().expect("plan");
            assert!(!plan.probe, "cycle {i}");
            let verdict = st.on_fetch_success(plan.ticket, 0, None, 1_000);
            assert!(matches!(verdict, FetchVerdict::Empty { empty_polls, .. } if empty_polls == i));
        }
        assert_eq!(st.empty_poll_count(), 3);
        let plan = st.begin_cycle().expect("plan");
        assert!(plan.probe, "probe regardless of counter modulus");
    }

    #[test]
    fn every_nth_cycle_probes() {
        let mut st = PollState::new(
            BackoffPolicy::default(),
            ProbePolicy {
                probe_every: 4,
                empty_probe_threshold: 0,
            },
            600_000,
        );
        st.start(key("s"));
        let probes: Vec<bool> = (0..8)
            .map(|_| {
                let plan = st.begin_cycle().expect("plan");
                st.on_fetch_success(plan.ticket, 1, None, 1_000);
                plan.probe
            })
            .collect();
        assert_eq!(probes, vec![false, false, false, true, false, false, false, true]);
    }

    #[test]
    fn terminal_probe_stops_polling() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        assert_eq!(
            st.on_probe(plan.ticket, SessionStatus::Complete),
            ProbeVerdict::Terminal(SessionStatus::Complete)
        );
        assert!(!st.is_polling());
        assert!(st.begin_cycle().is_none());
    }

    #[test]
    fn active_probe_continues() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        assert_eq!(st.on_probe(plan.ticket, SessionStatus::Pending), ProbeVerdict::Continue);
        assert!(st.is_current(plan.ticket), "fetch still expected on same ticket");
    }

    #[test]
    fn failures_back_off_exponentially_without_touching_cursor() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_success(plan.ticket, 1, Some(Cursor(7_000)), 1_000);

        for k in 1..=6u32 {
            let plan = st.begin_cycle().expect("plan");
            let verdict = st.on_fetch_failure(plan.ticket);
            assert_eq!(
                verdict,
                FetchVerdict::Retry {
                    delay_ms: (1_000 * 2u64.pow(k)).min(30_000),
                    attempt: k,
                }
            );
            assert!(st.is_polling(), "failures never stop polling");
        }
        assert_eq!(st.cursor().fetched, Cursor(7_000));
    }

    #[test]
    fn superseded_ticket_is_stale() {
        let mut st = polling();
        let first = st.begin_cycle().expect("plan");
        let second = st.issue_ticket();
        assert_eq!(
            st.on_fetch_success(first.ticket, 5, Some(Cursor(9_000)), 1_000),
            FetchVerdict::Stale
        );
        assert_eq!(st.cursor().fetched, Cursor::ORIGIN);
        assert_eq!(st.on_fetch_failure(first.ticket), FetchVerdict::Stale);
        assert!(st.is_current(second));
    }

    #[test]
    fn completed_ticket_cannot_be_reused() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_success(plan.ticket, 1, None, 1_000);
        assert_eq!(st.on_fetch_success(plan.ticket, 1, None, 1_000), FetchVerdict::Stale);
    }

    #[test]
    fn stop_resets_everything() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_success(plan.ticket, 0, Some(Cursor(100)), 1_000);
        let plan = st.begin_cycle().expect("plan");

        assert_eq!(st.stop(), Some(key("s")));
        assert!(!st.is_current(plan.ticket));
        assert_eq!(st.cursor().fetched, Cursor::ORIGIN);
        assert_eq!(st.empty_poll_count(), 0);
        assert_eq!(st.session_check_counter(), 0);
        assert_eq!(st.in_flight(), None);
    }

    #[test]
    fn recovery_rewinds_behind_committed_and_supersedes() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_success(plan.ticket, 2, Some(Cursor(60_000)), 1_000);
        st.commit_fetched().expect("commit");
        let in_flight = st.begin_cycle().expect("plan");

        let (recovery, rewind) = st.begin_recovery(5_000).expect("recovery");
        assert_eq!(recovery.cursor, Cursor(55_000));
        assert_eq!(rewind.previous_fetched, Cursor(60_000));
        assert!(!recovery.probe);
        assert!(!st.is_current(in_flight.ticket));
        assert!(st.is_current(recovery.ticket));
    }

    #[test]
    fn older_batch_leaves_cursor_and_commit_holds() {
        let mut st = polling();
        let plan = st.begin_cycle().expect("plan");
        st.on_fetch_success(plan.ticket, 1, Some(Cursor(9_000)), 1_000);
        st.commit_fetched().expect("commit");

        let plan = st.begin_cycle().expect("plan");
        assert_eq!(plan.cursor, Cursor(9_000));
        st.on_fetch_success(plan.ticket, 0, Some(Cursor(4_000)), 1_000);
        assert_eq!(st.cursor().fetched, Cursor(9_000));
        st.commit_fetched().expect("commit again");
        assert_eq!(st.cursor().committed, Cursor(9_000));
        assert!(st.cursor().is_caught_up());
    }
}
