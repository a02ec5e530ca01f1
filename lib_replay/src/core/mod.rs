//! # Core Engine Module
//!
//! The replay-and-fan-out engine. The components in this module are runtime
//! agnostic apart from `tokio` synchronization primitives and are safe to share
//! across tasks behind an `Arc`.
//!
//! ## Core Components:
//!
//! - **`cursor`**: cyclic reader over the loaded dataset that hands out refreshed
//!   copies of each record.
//!
//! - **`connection`**: the `Connection` send primitive and its two transports, a
//!   bounded per-subscriber channel and a shared multicast topic.
//!
//! - **`dispatcher`**: the copy-on-write connection set and zero-copy broadcaster.
//!
//! - **`fanout`**: the outlet that hands produced records to the persistence sink
//!   and the dispatcher.
//!
//! - **`scheduler`**: the timer-driven state machine that pulls batches from the
//!   cursor.

/// Cyclic dataset reader.
pub mod cursor;
/// Live subscriber connections and push events.
pub mod connection;
/// Zero-copy broadcaster over a copy-on-write connection set.
pub mod dispatcher;
/// Sink plus broadcaster outlet.
pub mod fanout;
/// Timer-driven replay state machine.
pub mod scheduler;

// --- Public API Re-exports ---
pub use connection::{
    ChannelConnection, Connection, ConnectionId, EventKind, PushEvent, SendOutcome,
    TopicConnection,
};
pub use cursor::{DatasetCursor, Replayable};
pub use dispatcher::{DispatchError, Dispatcher, PublishReport};
pub use fanout::{BatchSink, Fanout, NullSink};
pub use scheduler::{ReplayScheduler, SchedulerState, SchedulerStatus, TickOutcome};
