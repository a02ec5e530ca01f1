//! # Zero-Copy Event Dispatcher
//!
//! The `Dispatcher` owns the set of live connections and pushes every replayed
//! batch, single record and status notification to all of them.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: each publish serializes its payload exactly once into
//!     an `Arc<PushEvent>`; every connection receives a clone of the same pointer.
//!
//! 2.  **Copy-on-Write Registry**: the connection set is an `Arc<[..]>` behind a
//!     `RwLock`. Registration swaps in a new slice; a publish clones the current
//!     `Arc` and iterates that snapshot without holding the lock, so joins and
//!     leaves never disturb a sweep already in flight.
//!
//! 3.  **Failure Isolation**: a send that does not report `Delivered` marks that one
//!     connection dead. Dead connections are removed after the sweep; the others are
//!     unaffected.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::connection::{Connection, ConnectionId, EventKind, PushEvent, SendOutcome};
use crate::models::PageSample;

const WELCOME_MESSAGE: &str = "connected to replay stream";

/// Errors raised while managing the connection set.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The welcome event could not be delivered; the connection was discarded.
    #[error("connection {id} rejected the welcome event: {outcome:?}")]
    WelcomeRejected { id: ConnectionId, outcome: SendOutcome },
    #[error("connection {0} is already registered")]
    DuplicateId(ConnectionId),
}

/// Summary of one publish sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Connections in the snapshot.
    pub attempted: usize,
    pub delivered: usize,
    /// Connections removed because their send failed.
    pub pruned: Vec<ConnectionId>,
}

type Snapshot = Arc<[Arc<dyn Connection>]>;

/// # Core Dispatcher
pub struct Dispatcher {
    connections: RwLock<Snapshot>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// # Register
    ///
    /// Sends the `connected` welcome event and, only if it was delivered, adds the
    /// connection to the set. The welcome is therefore always the first event a
    /// connection receives.
    pub fn register(&self, connection: Arc<dyn Connection>) -> Result<(), DispatchError> {
        let id = connection.id().clone();
        if self.snapshot().iter().any(|c| c.id() == &id) {
            return Err(DispatchError::DuplicateId(id));
        }

        let welcome = Arc::new(PushEvent::connected(WELCOME_MESSAGE));
        let outcome = connection.send(&welcome);
        if !outcome.is_delivered() {
            warn!(connection = %id, ?outcome, "Welcome event failed; connection discarded");
            return Err(DispatchError::WelcomeRejected { id, outcome });
        }

        let mut guard = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|c| c.id() == &id) {
            return Err(DispatchError::DuplicateId(id));
        }
        let mut next: Vec<Arc<dyn Connection>> = guard.iter().cloned().collect();
        next.push(connection);
        *guard = Arc::from(next);
        info!(connection = %id, total = guard.len(), "Connection registered");
        Ok(())
    }

    /// Removes a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.remove_where(|c| c.id() == id);
        if removed > 0 {
            info!(connection = %id, "Connection unregistered");
        }
        removed > 0
    }

    pub fn count(&self) -> usize {
        self.snapshot().len()
    }

    /// Pushes a `batch-data` event. Empty batches are not published.
    pub fn publish_batch(&self, batch: &[PageSample]) -> PublishReport {
        if batch.is_empty() {
            return PublishReport::default();
        }
        self.publish_payload(EventKind::BatchData, batch)
    }

    /// Pushes a `single-data` event.
    pub fn publish_single(&self, record: &PageSample) -> PublishReport {
        self.publish_payload(EventKind::SingleData, record)
    }

    /// Pushes a `status` event.
    pub fn publish_status(&self, label: &str, message: &str) -> PublishReport {
        self.publish(Arc::new(PushEvent::status(label, message)))
    }

    fn publish_payload<T: Serialize + ?Sized>(&self, kind: EventKind, payload: &T) -> PublishReport {
        if self.count() == 0 {
            return PublishReport::default();
        }
        match PushEvent::new(kind, payload) {
            Ok(event) => self.publish(Arc::new(event)),
            Err(e) => {
                error!(event = %kind, error = %e, "Failed to encode push event");
                PublishReport::default()
            }
        }
    }

    /// # Publish
    ///
    /// Sweeps a snapshot of the connection set, then prunes the failures.
    pub fn publish(&self, event: Arc<PushEvent>) -> PublishReport {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return PublishReport::default();
        }

        let mut report = PublishReport {
            attempted: snapshot.len(),
            ..Default::default()
        };

        let mut dead: Vec<&Arc<dyn Connection>> = Vec::new();
        for connection in snapshot.iter() {
            match connection.send(&event) {
                SendOutcome::Delivered => {
                    report.delivered += 1;
                    continue;
                }
                SendOutcome::TransportClosed => {
                    debug!(connection = %connection.id(), "Peer closed; pruning");
                }
                SendOutcome::IoFailure(detail) => {
                    warn!(connection = %connection.id(), %detail, "Send failed; pruning");
                }
                SendOutcome::Unexpected(detail) => {
                    error!(connection = %connection.id(), %detail, "Unexpected send error; pruning");
                }
            }
            report.pruned.push(connection.id().clone());
            dead.push(connection);
        }

        // Match by identity: the id may already belong to a newer registration.
        if !dead.is_empty() {
            self.remove_where(|c| dead.iter().any(|d| Arc::ptr_eq(*d, c)));
        }
        debug!(
            event = %event.kind,
            attempted = report.attempted,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "Publish complete"
        );
        report
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.connections.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn remove_where(&self, predicate: impl Fn(&Arc<dyn Connection>) -> bool) -> usize {
        let mut guard = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        let next: Vec<Arc<dyn Connection>> =
            guard.iter().filter(|c| !predicate(*c)).cloned().collect();
        let removed = before - next.len();
        if removed > 0 {
            *guard = Arc::from(next);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every event it is handed; fails all sends after `fail_after`.
    struct Recorder {
        id: ConnectionId,
        received: Mutex<Vec<EventKind>>,
        fail_after: Option<usize>,
        failure: SendOutcome,
    }

    impl Recorder {
        fn healthy(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(id),
                received: Mutex::new(Vec::new()),
                fail_after: None,
                failure: SendOutcome::Delivered,
            })
        }

        fn failing_after(id: &str, n: usize, failure: SendOutcome) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(id),
                received: Mutex::new(Vec::new()),
                fail_after: Some(n),
                failure,
            })
        }

        fn kinds(&self) -> Vec<EventKind> {
            self.received.lock().unwrap().clone()
        }
    }

    impl Connection for Recorder {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        fn send(&self, event: &Arc<PushEvent>) -> SendOutcome {
            let mut received = self.received.lock().unwrap();
            if self.fail_after.is_some_and(|n| received.len() >= n) {
                return self.failure.clone();
            }
            received.push(event.kind);
            SendOutcome::Delivered
        }
    }

    fn batch(n: usize) -> Vec<PageSample> {
        (0..n)
            .map(|i| PageSample {
                row_key: format!("k{i}"),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn welcome_is_the_first_event() {
        let dispatcher = Dispatcher::new();
        let recorder = Recorder::healthy("a");
        dispatcher.register(recorder.clone()).unwrap();
        dispatcher.publish_batch(&batch(2));
        assert_eq!(recorder.kinds(), vec![EventKind::Connected, EventKind::BatchData]);
    }

    #[test]
    fn failed_welcome_discards_connection() {
        let dispatcher = Dispatcher::new();
        let recorder = Recorder::failing_after("a", 0, SendOutcome::TransportClosed);
        let err = dispatcher.register(recorder).unwrap_err();
        assert!(matches!(err, DispatchError::WelcomeRejected { .. }));
        assert_eq!(dispatcher.count(), 0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Recorder::healthy("a")).unwrap();
        let err = dispatcher.register(Recorder::healthy("a")).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateId(_)));
        assert_eq!(dispatcher.count(), 1);
    }

    #[test]
    fn one_failing_connection_does_not_affect_others() {
        let dispatcher = Dispatcher::new();
        let first = Recorder::healthy("1");
        let second = Recorder::failing_after("2", 1, SendOutcome::IoFailure("broken pipe".into()));
        let third = Recorder::healthy("3");
        for recorder in [&first, &second, &third] {
            dispatcher.register(recorder.clone()).unwrap();
        }

        let report = dispatcher.publish_batch(&batch(3));

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned, vec![ConnectionId::new("2")]);
        assert_eq!(dispatcher.count(), 2);
        assert_eq!(first.kinds().last(), Some(&EventKind::BatchData));
        assert_eq!(third.kinds().last(), Some(&EventKind::BatchData));

        let next = dispatcher.publish_status("stopped", "");
        assert_eq!(next.attempted, 2);
    }

    #[test]
    fn unregistered_connection_sees_nothing_more() {
        let dispatcher = Dispatcher::new();
        let recorder = Recorder::healthy("a");
        dispatcher.register(recorder.clone()).unwrap();
        assert!(dispatcher.unregister(&ConnectionId::new("a")));
        assert!(!dispatcher.unregister(&ConnectionId::new("a")));
        assert_eq!(dispatcher.count(), 0);

        let report = dispatcher.publish_batch(&batch(1));
        assert_eq!(report, PublishReport::default());
        assert_eq!(recorder.kinds(), vec![EventKind::Connected]);
    }

    #[test]
    fn empty_batch_is_not_published() {
        let dispatcher = Dispatcher::new();
        let recorder = Recorder::healthy("a");
        dispatcher.register(recorder.clone()).unwrap();
        assert_eq!(dispatcher.publish_batch(&[]).attempted, 0);
        assert_eq!(recorder.kinds(), vec![EventKind::Connected]);
    }

    #[test]
    fn single_and_status_events_reach_every_connection() {
        let dispatcher = Dispatcher::new();
        let a = Recorder::healthy("a");
        let b = Recorder::healthy("b");
        dispatcher.register(a.clone()).unwrap();
        dispatcher.register(b.clone()).unwrap();

        dispatcher.publish_single(&PageSample::default());
        dispatcher.publish_status("started", "go");

        let expected = vec![EventKind::Connected, EventKind::SingleData, EventKind::Status];
        assert_eq!(a.kinds(), expected);
        assert_eq!(b.kinds(), expected);
    }

    /// Accepts the welcome; on the next send hands its id over to a
    /// replacement, then reports the transport closed.
    struct HandOff {
        id: ConnectionId,
        sends: Mutex<usize>,
        target: Mutex<Option<(Arc<Dispatcher>, Arc<Recorder>)>>,
    }

    impl Connection for HandOff {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        fn send(&self, _event: &Arc<PushEvent>) -> SendOutcome {
            let mut sends = self.sends.lock().unwrap();
            *sends += 1;
            if *sends == 1 {
                return SendOutcome::Delivered;
            }
            if let Some((dispatcher, replacement)) = self.target.lock().unwrap().take() {
                assert!(dispatcher.unregister(&self.id));
                dispatcher.register(replacement).unwrap();
            }
            SendOutcome::TransportClosed
        }
    }

    #[test]
    fn pruning_spares_a_newcomer_under_the_same_id() {
        let dispatcher = Arc::new(Dispatcher::new());
        let newcomer = Recorder::healthy("a");
        let leaving = Arc::new(HandOff {
            id: ConnectionId::new("a"),
            sends: Mutex::new(0),
            target: Mutex::new(Some((Arc::clone(&dispatcher), newcomer.clone()))),
        });
        dispatcher.register(leaving).unwrap();

        let report = dispatcher.publish_status("started", "go");

        assert_eq!(report.pruned, vec![ConnectionId::new("a")]);
        assert_eq!(dispatcher.count(), 1);
        dispatcher.publish_status("stopped", "");
        assert_eq!(newcomer.kinds(), vec![EventKind::Connected, EventKind::Status]);
    }
}
