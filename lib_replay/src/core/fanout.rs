//! # Fan-out Outlet
//!
//! The single exit point for produced records. The scheduler and the anomaly
//! generators both emit through a `Fanout`, which hands the same data to the
//! persistence sink and then to the dispatcher. The two legs are independent:
//! the sink is fire-and-forget and cannot fail the dispatch.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::dispatcher::{Dispatcher, PublishReport};
use crate::models::PageSample;

/// One-way persistence endpoint.
///
/// Implementations must return promptly and must not panic; any I/O belongs on a
/// spawned task and any failure is logged there.
pub trait BatchSink: Send + Sync {
    fn submit(&self, batch: Arc<[PageSample]>);

    fn submit_single(&self, record: PageSample);
}

/// Discards everything. Used when no backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl BatchSink for NullSink {
    fn submit(&self, batch: Arc<[PageSample]>) {
        debug!(records = batch.len(), "No backend configured; batch not persisted");
    }

    fn submit_single(&self, _record: PageSample) {}
}

/// # Fanout
pub struct Fanout {
    sink: Arc<dyn BatchSink>,
    dispatcher: Arc<Dispatcher>,
}

impl Fanout {
    pub fn new(sink: Arc<dyn BatchSink>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { sink, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Hands `batch` to the sink and the dispatcher. Returns `None` for an empty
    /// batch, which is skipped entirely.
    pub fn emit_batch(&self, batch: Vec<PageSample>) -> Option<PublishReport> {
        if batch.is_empty() {
            warn!("Empty batch; nothing emitted");
            return None;
        }
        let batch: Arc<[PageSample]> = Arc::from(batch);
        self.sink.submit(Arc::clone(&batch));
        Some(self.dispatcher.publish_batch(&batch))
    }

    pub fn emit_single(&self, record: PageSample) -> PublishReport {
        let report = self.dispatcher.publish_single(&record);
        self.sink.submit_single(record);
        report
    }
}
