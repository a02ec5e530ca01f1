use std::sync::Arc;
use std::time::Duration;

use lib_replay::core::{
    BatchSink, ConnectionId, DatasetCursor, DispatchError, Dispatcher, Fanout, ReplayScheduler,
    TopicConnection,
};
use lib_replay::PageSample;

use crate::replay_logic::config::Settings;

/// Id under which the shared WebSocket topic is registered with the dispatcher.
pub const TOPIC_ID: &str = "ws-topic";

/// Shared handles behind every HTTP, WebSocket and SSE handler.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<ReplayScheduler>,
    pub dispatcher: Arc<Dispatcher>,
    pub fanout: Arc<Fanout>,
    /// All WebSocket clients share this one multicast topic.
    pub topic: TopicConnection,
    pub sse_timeout: Duration,
    pub stream_buffer: usize,
}

impl AppState {
    /// Wires cursor, dispatcher, fan-out and scheduler together and registers
    /// the WebSocket topic as a durable connection.
    pub fn new(
        settings: &Settings,
        records: Vec<PageSample>,
        sink: Arc<dyn BatchSink>,
    ) -> Result<Self, DispatchError> {
        let dispatcher = Arc::new(Dispatcher::new());
        let topic = TopicConnection::new(ConnectionId::new(TOPIC_ID), settings.topic_capacity);
        dispatcher.register(Arc::new(topic.clone()))?;

        let fanout = Arc::new(Fanout::new(sink, Arc::clone(&dispatcher)));
        let cursor = DatasetCursor::new(records, settings.loop_mode);
        let scheduler = Arc::new(ReplayScheduler::new(
            cursor,
            Arc::clone(&fanout),
            settings.batch_size,
        ));

        Ok(Self {
            scheduler,
            dispatcher,
            fanout,
            topic,
            sse_timeout: settings.sse_timeout,
            stream_buffer: settings.stream_buffer,
        })
    }
}
