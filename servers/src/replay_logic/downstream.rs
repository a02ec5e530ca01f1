use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Extension, Router,
};
use futures_util::stream::{self, SplitSink};
use futures_util::{SinkExt, StreamExt};
use lib_replay::core::{ChannelConnection, ConnectionId, Dispatcher, PushEvent};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_graceful::{ShutdownGuard, WeakShutdownGuard};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::replay_logic::config::Settings;
use crate::replay_logic::control;
use crate::replay_logic::state::AppState;

/// A socket that cannot take a frame within this window is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-socket replies (pong) queued ahead of the writer.
const REPLY_BUFFER: usize = 16;

/// Builds the full HTTP surface.
pub fn router(state: AppState, shutdown: WeakShutdownGuard, cors: bool) -> Router {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/sse/connect", get(sse_handler))
        .route("/scenario/start", post(control::start_handler))
        .route("/scenario/stop", post(control::stop_handler))
        .route("/scenario/restart", post(control::restart_handler))
        .route("/scenario/status", get(control::status_handler))
        .route("/scenario/slow-country", post(control::slow_country_handler))
        .route("/scenario/error-spike", post(control::error_spike_handler))
        .route("/scenario/tcp-error", post(control::tcp_error_handler))
        .route("/scenario/browser-issue", post(control::browser_issue_handler))
        .route("/scenario/recover", post(control::recover_handler))
        .layer(Extension(shutdown));

    let app = if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };
    app.with_state(state)
}

/// Binds the listener and serves until the shutdown guard is cancelled.
pub async fn serve(settings: &Settings, state: AppState, guard: ShutdownGuard) -> anyhow::Result<()> {
    let app = router(state, guard.clone_weak(), settings.cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Replay gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            guard.cancelled().await;
            info!("HTTP server shutting down.");
        })
        .await
        .context("HTTP server terminated with an error")?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// --- WebSocket topic ---

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<ClientMessage>(text)
        .map(|msg| msg.kind == "ping")
        .unwrap_or(false)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(shutdown): Extension<WeakShutdownGuard>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, shutdown))
}

/// One topic socket. The reader half answers pings; a writer task owns the
/// sink and merges replies with topic frames.
async fn handle_socket(socket: WebSocket, state: AppState, shutdown: WeakShutdownGuard) {
    let client_id = ConnectionId::random();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (reply_tx, reply_rx) = mpsc::channel::<Arc<PushEvent>>(REPLY_BUFFER);

    // Join before the writer starts so no frame published after the upgrade is missed.
    let topic_rx = state.topic.subscribe();
    info!(
        client = %client_id,
        sockets = state.topic.subscriber_count(),
        "WebSocket client joined topic"
    );

    let mut writer = tokio::spawn(writer_task(ws_sender, reply_rx, topic_rx, client_id.clone()));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = &mut writer => break,
            msg = ws_receiver.next() => msg,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                if is_ping(text.as_str()) {
                    if reply_tx.try_send(Arc::new(PushEvent::pong())).is_err() {
                        warn!(client = %client_id, "Reply queue full, dropping socket");
                        break;
                    }
                } else {
                    debug!(client = %client_id, "Ignoring client message: {}", text.as_str());
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(client = %client_id, reason = ?frame, "Client initiated close");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(client = %client_id, error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        }
    }

    drop(reply_tx);
    writer.abort();
    info!(client = %client_id, "WebSocket client left topic");
}

async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut replies: mpsc::Receiver<Arc<PushEvent>>,
    mut topic: broadcast::Receiver<Arc<PushEvent>>,
    client_id: ConnectionId,
) {
    let welcome = PushEvent::status("connected", "WebSocket connected");
    if !send_frame(&mut ws_sender, &welcome, &client_id).await {
        return;
    }

    loop {
        let event = tokio::select! {
            reply = replies.recv() => match reply {
                Some(event) => event,
                None => break,
            },
            published = topic.recv() => match published {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client = %client_id, skipped, "Socket lagged behind the topic");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if !send_frame(&mut ws_sender, &event, &client_id).await {
            break;
        }
    }
    let _ = ws_sender.close().await;
}

async fn send_frame(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    event: &PushEvent,
    client_id: &ConnectionId,
) -> bool {
    match timeout(SEND_TIMEOUT, ws_sender.send(Message::Text(event.to_frame().into()))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(client = %client_id, error = %e, "WebSocket send failed");
            false
        }
        Err(_) => {
            warn!(client = %client_id, "WebSocket send timed out");
            false
        }
    }
}

// --- Server-Sent Events ---

/// Unregisters the stream's connection however the response body ends.
struct SseSession {
    id: ConnectionId,
    dispatcher: Arc<Dispatcher>,
}

impl Drop for SseSession {
    fn drop(&mut self) {
        if self.dispatcher.unregister(&self.id) {
            info!(client = %self.id, remaining = self.dispatcher.count(), "SSE stream closed");
        }
    }
}

async fn sse_handler(
    State(state): State<AppState>,
    Extension(shutdown): Extension<WeakShutdownGuard>,
) -> Response {
    let id = ConnectionId::random();
    let (connection, rx) = ChannelConnection::new(id.clone(), state.stream_buffer);
    if let Err(e) = state.dispatcher.register(Arc::new(connection)) {
        warn!(client = %id, error = %e, "SSE registration failed");
        return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
    }
    info!(client = %id, connections = state.dispatcher.count(), "SSE stream opened");

    let session = SseSession {
        id,
        dispatcher: Arc::clone(&state.dispatcher),
    };
    let deadline = Instant::now() + state.sse_timeout;

    let events = stream::unfold((rx, session, shutdown), move |(mut rx, session, shutdown)| async move {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            received = timeout_at(deadline, rx.recv()) => Some(received),
        };
        match next {
            Some(Ok(Some(event))) => {
                let sse_event = Event::default().event(event.kind.as_str()).data(event.data.as_str());
                Some((Ok::<_, Infallible>(sse_event), (rx, session, shutdown)))
            }
            // Pruned by the dispatcher.
            Some(Ok(None)) => None,
            Some(Err(_)) => {
                info!(client = %session.id, "SSE stream reached its lifetime limit");
                None
            }
            None => None,
        }
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
