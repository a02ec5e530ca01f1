//! # Live Connections
//!
//! A `Connection` is one live subscriber the `Dispatcher` can push events to. The
//! send primitive is synchronous and never blocks: transports hand the event to a
//! bounded queue (or a broadcast ring) and report what happened as a tagged
//! [`SendOutcome`].
//!
//! Events are serialized once per publish into a [`PushEvent`] and shared between
//! all connections behind an `Arc`, so a fan-out to N subscribers costs N pointer
//! clones rather than N serializations.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::utils::epoch_millis;

/// Identity of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wraps an explicit identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random (UUID v4) identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named events on the push wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Welcome event, always the first event a connection sees.
    Connected,
    /// A tick's batch of records.
    BatchData,
    /// One ad-hoc record.
    SingleData,
    /// Scheduler lifecycle notifications.
    Status,
    /// Reply to a client keep-alive.
    Pong,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::BatchData => "batch-data",
            EventKind::SingleData => "single-data",
            EventKind::Status => "status",
            EventKind::Pong => "pong",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Push Event
///
/// An event name plus its payload, already rendered as JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub kind: EventKind,
    pub data: String,
}

impl PushEvent {
    /// Serializes `payload` into a new event.
    pub fn new<T: Serialize + ?Sized>(kind: EventKind, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            data: serde_json::to_string(payload)?,
        })
    }

    /// `connected` welcome event: `{message, timestamp}`.
    pub fn connected(message: &str) -> Self {
        Self {
            kind: EventKind::Connected,
            data: json!({ "message": message, "timestamp": epoch_millis() }).to_string(),
        }
    }

    /// `status` event: `{status, message, timestamp}`.
    pub fn status(label: &str, message: &str) -> Self {
        Self {
            kind: EventKind::Status,
            data: json!({ "status": label, "message": message, "timestamp": epoch_millis() })
                .to_string(),
        }
    }

    /// `pong` reply: `{message, timestamp}`.
    pub fn pong() -> Self {
        Self {
            kind: EventKind::Pong,
            data: json!({ "message": "pong", "timestamp": epoch_millis() }).to_string(),
        }
    }

    /// Renders the multiplexed frame used on topic sockets:
    /// `{"event": <name>, "data": <payload>}`.
    pub fn to_frame(&self) -> String {
        format!(r#"{{"event":"{}","data":{}}}"#, self.kind.as_str(), self.data)
    }
}

/// Result of a single send attempt. Anything but `Delivered` marks the
/// connection as dead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The peer went away.
    TransportClosed,
    /// The transport refused the write (e.g. its queue is full).
    IoFailure(String),
    Unexpected(String),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// One live subscriber.
pub trait Connection: Send + Sync {
    fn id(&self) -> &ConnectionId;

    /// Hands `event` to the transport without blocking.
    fn send(&self, event: &Arc<PushEvent>) -> SendOutcome;
}

/// # Channel Connection
///
/// A dedicated per-subscriber stream backed by a bounded `mpsc` queue. The
/// receiving half is drained by the transport task (e.g. an SSE response body).
/// A full queue is treated as an I/O failure: a subscriber that cannot keep up
/// is dropped rather than buffered without bound.
#[derive(Debug)]
pub struct ChannelConnection {
    id: ConnectionId,
    sender: mpsc::Sender<Arc<PushEvent>>,
}

impl ChannelConnection {
    pub fn new(id: ConnectionId, buffer: usize) -> (Self, mpsc::Receiver<Arc<PushEvent>>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { id, sender }, receiver)
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, event: &Arc<PushEvent>) -> SendOutcome {
        match self.sender.try_send(Arc::clone(event)) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                SendOutcome::IoFailure("stream queue full".to_string())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::TransportClosed,
        }
    }
}

/// # Topic Connection
///
/// A shared multicast topic registered with the dispatcher as a single durable
/// connection. Sockets join by calling [`TopicConnection::subscribe`]; a send
/// with no subscribers is still a successful publish, so the topic never gets
/// pruned.
#[derive(Debug, Clone)]
pub struct TopicConnection {
    id: ConnectionId,
    sender: broadcast::Sender<Arc<PushEvent>>,
}

impl TopicConnection {
    pub fn new(id: ConnectionId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { id, sender }
    }

    /// Joins the topic. The receiver sees every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushEvent>> {
        self.sender.subscribe()
    }

    /// Number of sockets currently joined.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Connection for TopicConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, event: &Arc<PushEvent>) -> SendOutcome {
        // Err only means nobody is listening right now.
        let _ = self.sender.send(Arc::clone(event));
        SendOutcome::Delivered
    }
}
