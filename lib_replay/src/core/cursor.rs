//! # Dataset Cursor
//!
//! Slices an immutable, pre-loaded record list into batches. Every record handed
//! out is a refreshed copy (new unique key, current server timestamp), so a
//! dataset that wraps around still looks like a stream of new samples.
//!
//! The cursor itself is plain `&mut self` state; callers that share it across
//! tasks wrap it in a `std::sync::Mutex` held only for the duration of a read.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::PageSample;
use crate::utils::local_now;

/// Records that can be re-emitted with a fresh identity.
pub trait Replayable: Clone {
    /// Returns a copy with a new unique key and refreshed emission timestamps.
    fn refreshed(&self) -> Self;
}

impl Replayable for PageSample {
    fn refreshed(&self) -> Self {
        let now = local_now();
        let mut copy = self.clone();
        copy.row_key = Uuid::new_v4().to_string();
        copy.ts_server = Some(now);
        copy.created_at = Some(now);
        copy
    }
}

/// # Dataset Cursor
///
/// `position` always satisfies `position <= len`. With `loop_mode` it wraps back
/// to 0 when it reaches the end; without it, `position == len` is the exhausted
/// state.
#[derive(Debug)]
pub struct DatasetCursor<T> {
    records: Arc<[T]>,
    position: usize,
    loop_mode: bool,
}

impl<T: Replayable> DatasetCursor<T> {
    pub fn new(records: impl Into<Arc<[T]>>, loop_mode: bool) -> Self {
        Self {
            records: records.into(),
            position: 0,
            loop_mode,
        }
    }

    /// Takes up to `size` refreshed records starting at the current position.
    ///
    /// In loop mode a single batch may wrap past the end. Otherwise the batch is
    /// cut short at the end of the dataset, and every later call returns an empty
    /// batch. An empty dataset always yields an empty batch.
    pub fn next_batch(&mut self, size: usize) -> Vec<T> {
        let total = self.records.len();
        if total == 0 || size == 0 {
            return Vec::new();
        }

        let mut batch = Vec::with_capacity(size.min(total));
        while batch.len() < size {
            if self.position >= total {
                if !self.loop_mode {
                    break;
                }
                self.position = 0;
            }
            batch.push(self.records[self.position].refreshed());
            self.position += 1;
        }

        if self.loop_mode && self.position >= total {
            self.position = 0;
        }
        batch
    }

    pub fn has_next(&self) -> bool {
        self.loop_mode || self.position < self.records.len()
    }

    /// `(position, total)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.position, self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn loop_mode(&self) -> bool {
        self.loop_mode
    }
}
