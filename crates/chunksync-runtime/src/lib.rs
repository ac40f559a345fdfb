//! chunksync-runtime: the async side of chunk synchronization.
//!
//! `SyncEngine` drives the pure state machines from `chunksync-scheduler`
//! against a `ChunkTransport` and hands consolidated chunks to a
//! `RenderSink`. `HttpTransport` and `TerminalSink` are the production
//! implementations used by the `chunksync` binary.

pub mod config;
pub mod engine;
pub mod events;
pub mod http;
pub mod sink;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{EngineClosed, SyncEngine, SyncHandle};
pub use events::{SyncEvent, TerminalReason};
pub use http::HttpTransport;
pub use sink::{RecordingSink, RenderSink, RenderedId, SinkCall, TerminalSink};
pub use transport::ChunkTransport;
