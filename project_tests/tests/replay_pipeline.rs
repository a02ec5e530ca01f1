//! Dataset file -> cursor -> scheduler -> subscriber, end to end.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use lib_replay::core::{
    ChannelConnection, ConnectionId, DatasetCursor, Dispatcher, EventKind, Fanout, NullSink,
    PushEvent, ReplayScheduler, TickOutcome,
};
use lib_replay::ingestors::load_all;
use project_tests::{dataset_text, write_dataset};
use tokio::sync::mpsc;

fn drain(rx: &mut mpsc::Receiver<Arc<PushEvent>>) -> Vec<Arc<PushEvent>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn batch_keys(event: &PushEvent) -> Vec<String> {
    let records: serde_json::Value = serde_json::from_str(&event.data).unwrap();
    records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["rowKey"].as_str().unwrap().to_string())
        .collect()
}

async fn scheduler_over(
    rows: usize,
    loop_mode: bool,
    batch: usize,
) -> (Arc<ReplayScheduler>, mpsc::Receiver<Arc<PushEvent>>) {
    let file = write_dataset(&dataset_text(rows), ".csv");
    let records = load_all(file.path().to_str().unwrap()).await.unwrap();
    assert_eq!(records.len(), rows);

    let dispatcher = Arc::new(Dispatcher::new());
    let (connection, rx) = ChannelConnection::new(ConnectionId::new("sse-1"), 64);
    dispatcher.register(Arc::new(connection)).unwrap();

    let fanout = Arc::new(Fanout::new(Arc::new(NullSink), dispatcher));
    let cursor = DatasetCursor::new(records, loop_mode);
    (Arc::new(ReplayScheduler::new(cursor, fanout, batch)), rx)
}

#[tokio::test]
async fn non_looping_replay_drains_then_idles() {
    let (scheduler, mut rx) = scheduler_over(10, false, 4).await;

    assert_eq!(scheduler.tick().await, TickOutcome::Stopped);
    scheduler.start().await;

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(scheduler.tick().await);
    }
    assert_eq!(
        outcomes,
        vec![
            TickOutcome::Dispatched { records: 4, delivered: 1 },
            TickOutcome::Dispatched { records: 4, delivered: 1 },
            TickOutcome::Dispatched { records: 2, delivered: 1 },
            TickOutcome::Exhausted,
            TickOutcome::Exhausted,
        ]
    );

    let events = drain(&mut rx);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Connected,
            EventKind::Status,
            EventKind::BatchData,
            EventKind::BatchData,
            EventKind::BatchData,
        ]
    );

    let sizes: Vec<usize> = events[2..].iter().map(|e| batch_keys(e).len()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);

    // Replayed copies carry fresh keys, never the recorded ones.
    let keys: HashSet<String> = events[2..].iter().flat_map(|e| batch_keys(e)).collect();
    assert_eq!(keys.len(), 10);
    assert!(keys.iter().all(|k| !k.starts_with('r')));

    let status = scheduler.status().await;
    assert_eq!((status.position, status.total), (10, 10));
}

#[tokio::test]
async fn looping_replay_wraps_with_distinct_keys() {
    let (scheduler, mut rx) = scheduler_over(3, true, 5).await;
    scheduler.start().await;

    assert_eq!(
        scheduler.tick().await,
        TickOutcome::Dispatched { records: 5, delivered: 1 }
    );
    let events = drain(&mut rx);
    let batch = events.last().unwrap();
    let keys: HashSet<String> = batch_keys(batch).into_iter().collect();
    assert_eq!(keys.len(), 5);

    let records: serde_json::Value = serde_json::from_str(&batch.data).unwrap();
    let order: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["srcIp"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2", "10.0.0.0", "10.0.0.1"]);
    assert_eq!(scheduler.status().await.position, 2);
}

#[tokio::test]
async fn stop_then_restart_resumes_where_it_left_off() {
    let (scheduler, mut rx) = scheduler_over(10, false, 3).await;
    scheduler.start().await;
    scheduler.tick().await;

    scheduler.stop().await;
    scheduler.stop().await;
    assert_eq!(scheduler.tick().await, TickOutcome::Stopped);

    scheduler.restart().await;
    scheduler.tick().await;
    assert_eq!(scheduler.status().await.position, 6);

    let statuses: Vec<String> = drain(&mut rx)
        .iter()
        .filter(|e| e.kind == EventKind::Status)
        .map(|e| {
            let data: serde_json::Value = serde_json::from_str(&e.data).unwrap();
            data["status"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(statuses, vec!["started", "stopped", "stopped", "restarted"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn ticker_drives_the_replay() {
    let (scheduler, mut rx) = scheduler_over(6, false, 2).await;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let ticker = scheduler.run_every(Duration::from_millis(100), async move {
        let _ = stop_rx.await;
    });
    scheduler.start().await;

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    stop_tx.send(()).unwrap();
    ticker.await.unwrap();

    let batches = drain(&mut rx)
        .into_iter()
        .filter(|e| e.kind == EventKind::BatchData)
        .count();
    assert_eq!(batches, 3);
    assert_eq!(scheduler.status().await.position, 6);
}

#[tokio::test]
async fn unreadable_dataset_yields_idle_scheduler() {
    assert!(load_all("/no/such/dataset.csv").await.is_err());

    let dispatcher = Arc::new(Dispatcher::new());
    let fanout = Arc::new(Fanout::new(Arc::new(NullSink), dispatcher));
    let scheduler = ReplayScheduler::new(DatasetCursor::new(Vec::new(), false), fanout, 10);
    scheduler.start().await;
    assert_eq!(scheduler.tick().await, TickOutcome::Exhausted);
}
