//! # Replay Scheduler
//!
//! Drives the replay. A ticker task started by [`ReplayScheduler::run_every`]
//! calls [`ReplayScheduler::tick`] on a fixed period; each tick pulls one batch
//! from the cursor and emits it through the [`Fanout`]. Whether ticks do anything is decided by an
//! explicit [`SchedulerState`] that the control surface toggles.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::cursor::DatasetCursor;
use crate::core::fanout::Fanout;
use crate::models::PageSample;

/// Operational states of the replay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Ticks are no-ops. Initial state.
    Stopped,
    Running,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Stopped,
    /// Non-looping dataset fully replayed.
    Exhausted,
    /// The cursor produced no records.
    Empty,
    Dispatched { records: usize, delivered: usize },
}

/// Snapshot returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub status: &'static str,
    pub message: String,
    pub position: usize,
    pub total: usize,
    pub loop_mode: bool,
}

/// Shortest ticker period accepted by [`ReplayScheduler::run_every`].
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// # Replay Scheduler
pub struct ReplayScheduler {
    cursor: Mutex<DatasetCursor<PageSample>>,
    state: RwLock<SchedulerState>,
    fanout: Arc<Fanout>,
    batch_size: usize,
}

impl ReplayScheduler {
    pub fn new(cursor: DatasetCursor<PageSample>, fanout: Arc<Fanout>, batch_size: usize) -> Self {
        Self {
            cursor: Mutex::new(cursor),
            state: RwLock::new(SchedulerState::Stopped),
            fanout,
            batch_size,
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Enables ticking and publishes a `started` status event. Calling it while
    /// already running keeps it running.
    pub async fn start(&self) {
        self.transition(SchedulerState::Running).await;
        self.fanout
            .dispatcher()
            .publish_status("started", "Replay started");
    }

    /// Disables ticking and publishes a `stopped` status event. Ticks that begin
    /// after this returns do nothing.
    pub async fn stop(&self) {
        self.transition(SchedulerState::Stopped).await;
        self.fanout
            .dispatcher()
            .publish_status("stopped", "Replay stopped");
    }

    /// Stop followed by start, announced as a single `restarted` event. The
    /// cursor keeps its position.
    pub async fn restart(&self) {
        *self.state.write().await = SchedulerState::Running;
        info!("Replay restarted");
        self.fanout
            .dispatcher()
            .publish_status("restarted", "Replay restarted");
    }

    async fn transition(&self, next: SchedulerState) {
        let mut state = self.state.write().await;
        if *state != next {
            info!("Transitioning replay state: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// # Tick
    ///
    /// One unit of periodic work. Downstream failures are contained in the
    /// sink and dispatcher, so a tick never fails.
    pub async fn tick(&self) -> TickOutcome {
        if self.state().await == SchedulerState::Stopped {
            return TickOutcome::Stopped;
        }

        let (batch, position, total) = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            if !cursor.has_next() {
                let (position, total) = cursor.progress();
                debug!(position, total, "Dataset exhausted; tick skipped");
                return TickOutcome::Exhausted;
            }
            let batch = cursor.next_batch(self.batch_size);
            let (position, total) = cursor.progress();
            (batch, position, total)
        };

        if batch.is_empty() {
            debug!("Cursor returned no records; tick skipped");
            return TickOutcome::Empty;
        }

        let records = batch.len();
        let delivered = self
            .fanout
            .emit_batch(batch)
            .map(|report| report.delivered)
            .unwrap_or_default();
        info!(
            records,
            delivered,
            "Replay progress: {}/{} ({:.1}%)",
            position,
            total,
            percent(position, total)
        );
        TickOutcome::Dispatched { records, delivered }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state().await;
        let (position, total, loop_mode) = {
            let cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let (position, total) = cursor.progress();
            (position, total, cursor.loop_mode())
        };
        let message = match state {
            SchedulerState::Running => format!("Replaying {total} records"),
            SchedulerState::Stopped => "Replay is stopped".to_string(),
        };
        SchedulerStatus {
            enabled: state == SchedulerState::Running,
            status: state.as_str(),
            message,
            position,
            total,
            loop_mode,
        }
    }

    /// Spawns the ticker: [`tick`](Self::tick) every `period`, first one a
    /// full period after the call, until `shutdown` resolves. Ticks run one at
    /// a time; a late tick delays the ones after it.
    pub fn run_every<F>(self: &Arc<Self>, period: Duration, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let period = if period.is_zero() {
            warn!("Zero send interval; using {:?}", MIN_PERIOD);
            MIN_PERIOD
        } else {
            period
        };
        let scheduler = Arc::clone(self);
        info!(period_ms = period.as_millis() as u64, "Replay ticker started");

        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Replay ticker received shutdown signal");
                        break;
                    }
                    _ = ticks.tick() => {
                        scheduler.tick().await;
                    }
                }
            }
        })
    }
}

fn percent(position: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        position as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::{ChannelConnection, ConnectionId, EventKind, PushEvent};
    use crate::core::dispatcher::Dispatcher;
    use crate::core::fanout::NullSink;
    use tokio::sync::mpsc;

    fn scheduler(records: usize, loop_mode: bool, batch_size: usize) -> (Arc<ReplayScheduler>, mpsc::Receiver<Arc<PushEvent>>) {
        let dispatcher = Arc::new(Dispatcher::new());
        let (conn, rx) = ChannelConnection::new(ConnectionId::new("listener"), 64);
        dispatcher.register(Arc::new(conn)).unwrap();
        let fanout = Arc::new(Fanout::new(Arc::new(NullSink), dispatcher));
        let cursor = DatasetCursor::new(vec![PageSample::default(); records], loop_mode);
        (Arc::new(ReplayScheduler::new(cursor, fanout, batch_size)), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<PushEvent>>) -> Vec<Arc<PushEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn status_label(event: &PushEvent) -> String {
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        data["status"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn stopped_scheduler_does_nothing() {
        let (scheduler, mut rx) = scheduler(5, true, 2);
        assert_eq!(scheduler.tick().await, TickOutcome::Stopped);
        assert_eq!(scheduler.status().await.position, 0);
        // only the welcome
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn stop_twice_emits_two_status_events() {
        let (scheduler, mut rx) = scheduler(5, true, 2);
        drain(&mut rx);

        scheduler.stop().await;
        scheduler.stop().await;

        assert_eq!(scheduler.state().await, SchedulerState::Stopped);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == EventKind::Status));
        assert!(events.iter().all(|e| status_label(e) == "stopped"));
    }

    #[tokio::test]
    async fn replays_ten_records_in_batches_of_four() {
        let (scheduler, mut rx) = scheduler(10, false, 4);
        scheduler.start().await;

        let mut sizes = Vec::new();
        for _ in 0..5 {
            match scheduler.tick().await {
                TickOutcome::Dispatched { records, .. } => sizes.push(records),
                TickOutcome::Exhausted | TickOutcome::Empty => sizes.push(0),
                TickOutcome::Stopped => panic!("scheduler should be running"),
            }
        }
        assert_eq!(sizes, vec![4, 4, 2, 0, 0]);
        assert_eq!(scheduler.tick().await, TickOutcome::Exhausted);

        let batches = drain(&mut rx)
            .into_iter()
            .filter(|e| e.kind == EventKind::BatchData)
            .count();
        assert_eq!(batches, 3);
    }

    #[tokio::test]
    async fn restart_keeps_cursor_position() {
        let (scheduler, mut rx) = scheduler(10, false, 3);
        scheduler.start().await;
        scheduler.tick().await;
        assert_eq!(scheduler.status().await.position, 3);
        drain(&mut rx);

        scheduler.restart().await;

        let status = scheduler.status().await;
        assert!(status.enabled);
        assert_eq!(status.position, 3);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(status_label(&events[0]), "restarted");
    }

    #[tokio::test]
    async fn empty_looping_dataset_ticks_as_noop() {
        let (scheduler, mut rx) = scheduler(0, true, 4);
        scheduler.start().await;
        drain(&mut rx);
        assert_eq!(scheduler.tick().await, TickOutcome::Empty);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn status_reports_state_and_progress() {
        let (scheduler, _rx) = scheduler(8, true, 4);
        let stopped = scheduler.status().await;
        assert!(!stopped.enabled);
        assert_eq!(stopped.status, "stopped");

        scheduler.start().await;
        scheduler.start().await;
        scheduler.tick().await;
        let running = scheduler.status().await;
        assert!(running.enabled);
        assert_eq!(running.status, "running");
        assert_eq!((running.position, running.total), (4, 8));
        assert!(running.loop_mode);

        let json = serde_json::to_value(&running).unwrap();
        assert_eq!(json["loopMode"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_fires_once_per_sub_second_period() {
        let (scheduler, mut rx) = scheduler(1_000, false, 1);
        scheduler.start().await;
        drain(&mut rx);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let ticker = scheduler.run_every(Duration::from_millis(50), async move {
            let _ = stop_rx.await;
        });
        tokio::time::sleep(Duration::from_millis(1_025)).await;

        // 1025 ms / 50 ms
        let position = scheduler.status().await.position;
        assert_eq!(position, 20);
        let batches = drain(&mut rx)
            .iter()
            .filter(|e| e.kind == EventKind::BatchData)
            .count();
        assert_eq!(batches, 20);

        stop_tx.send(()).unwrap();
        ticker.await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scheduler.status().await.position, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_waits_a_full_period_before_the_first_tick() {
        let (scheduler, _rx) = scheduler(10, false, 1);
        scheduler.start().await;
        let ticker = scheduler.run_every(Duration::from_millis(300), std::future::pending());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(scheduler.status().await.position, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.status().await.position, 1);
        ticker.abort();
    }

    #[tokio::test]
    async fn exhausted_dataset_reports_exhausted_on_every_tick() {
        let (scheduler, mut rx) = scheduler(3, false, 2);
        scheduler.start().await;
        drain(&mut rx);

        assert!(matches!(scheduler.tick().await, TickOutcome::Dispatched { records: 2, .. }));
        assert!(matches!(scheduler.tick().await, TickOutcome::Dispatched { records: 1, .. }));
        assert_eq!(scheduler.tick().await, TickOutcome::Exhausted);
        assert_eq!(scheduler.tick().await, TickOutcome::Exhausted);
        assert_eq!(drain(&mut rx).len(), 2);
        assert_eq!(scheduler.status().await.position, 3);
    }
}
