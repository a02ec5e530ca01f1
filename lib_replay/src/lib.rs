//! # lib_replay
//!
//! Replays a recorded dataset of HTTP page-session samples as if it were a live
//! sensor feed. A timer drives the `core::scheduler::ReplayScheduler`, which pulls
//! fresh batches from the `core::cursor::DatasetCursor` and hands each batch to a
//! persistence sink and to the `core::dispatcher::Dispatcher`, which pushes it to
//! every live subscriber.
//!
//! Optional modules are gated behind cargo features, mirroring how the servers
//! pick only what they need:
//!
//! - `ingestors`: delimited dataset loader (file path or HTTP object URL).
//! - `retrieve`: retrying HTTP client and the backend persistence sink.
//! - `scenarios`: synthetic anomaly generators.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Record types moved through the engine.
pub mod models;
/// Cursor, connection registry, fan-out outlet and scheduler.
pub mod core;
/// Small time helpers shared across modules.
pub mod utils;

/// Dataset loading.
#[cfg(feature = "ingestors")]
pub mod ingestors;
/// HTTP retrieval and the persistence sink.
#[cfg(feature = "retrieve")]
pub mod retrieve;
/// Synthetic anomaly generators.
#[cfg(feature = "scenarios")]
pub mod scenarios;

pub use crate::core::{
    BatchSink, Connection, ConnectionId, DatasetCursor, Dispatcher, Fanout, NullSink,
    PublishReport, ReplayScheduler, SchedulerState, SendOutcome,
};
pub use crate::models::PageSample;
