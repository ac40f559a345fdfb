//! chunksync-scheduler: when to poll, when to back off, when to expect the
//! next chunk, and where to scroll.
//!
//! Pure, testable state machines with no IO or async dependencies. All
//! time values are monotonic milliseconds supplied by the caller.

pub mod backoff;
pub mod interval;
pub mod poll;
pub mod predictive;
pub mod scroll;

pub use backoff::{Backoff, BackoffPolicy};
pub use interval::TierIntervals;
pub use poll::{
    CyclePlan, FetchTicket, FetchVerdict, PollState, ProbePolicy, ProbeVerdict, StartOutcome,
};
pub use predictive::{PlaceholderPlan, PredictiveConfig, PredictiveScheduler};
pub use scroll::{ScrollConfig, ScrollPositionSmoother};
