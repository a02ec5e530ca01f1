//! # Integration Test Fixtures
//!
//! Shared helpers for the integration tests under `tests/`: dataset files on
//! disk, a recording subscriber, and a tiny HTTP backend that captures what the
//! persistence sink posts.

#![forbid(unsafe_code)]

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use lib_replay::core::{Connection, ConnectionId, PushEvent, SendOutcome};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Header used by [`dataset_text`].
pub const DATASET_HEADER: &str = "row_key,src_ip,dst_port,country_name_req,ts_page,http_res_code";

/// `rows` well-formed CSV lines keyed `r0`, `r1`, ...
pub fn dataset_text(rows: usize) -> String {
    let mut text = String::from(DATASET_HEADER);
    text.push('\n');
    for i in 0..rows {
        text.push_str(&format!("r{i},10.0.0.{i},443,KR,{}.5,200\n", 1000 + i));
    }
    text
}

/// Writes `text` to a temp file ending in `suffix` (e.g. `.csv`).
pub fn write_dataset(text: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create dataset file");
    file.write_all(text.as_bytes()).expect("write dataset file");
    file
}

/// Subscriber that keeps every event it is sent, or refuses all of them.
pub struct RecordingConnection {
    id: ConnectionId,
    failure: Option<SendOutcome>,
    received: Mutex<Vec<Arc<PushEvent>>>,
}

impl RecordingConnection {
    pub fn healthy(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(id),
            failure: None,
            received: Mutex::new(Vec::new()),
        })
    }

    /// Accepts the first send (the welcome) and answers `failure` afterwards.
    pub fn failing_after_welcome(id: &str, failure: SendOutcome) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(id),
            failure: Some(failure),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Arc<PushEvent>> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event names in arrival order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind.as_str()).collect()
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, event: &Arc<PushEvent>) -> SendOutcome {
        let mut received = self.received.lock().unwrap_or_else(PoisonError::into_inner);
        match &self.failure {
            Some(failure) if !received.is_empty() => failure.clone(),
            _ => {
                received.push(Arc::clone(event));
                SendOutcome::Delivered
            }
        }
    }
}

/// One request captured by [`MockBackend`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// HTTP/1.1 endpoint answering every request with a fixed status line.
pub struct MockBackend {
    pub base_url: String,
    pub requests: mpsc::UnboundedReceiver<RecordedRequest>,
}

impl MockBackend {
    /// Starts listening on an ephemeral port; `status` is e.g. `"200 OK"`.
    pub async fn start(status: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let (tx, requests) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(request) = serve_one(socket, status).await {
                        let _ = tx.send(request);
                    }
                });
            }
        });
        Self {
            base_url: format!("http://{addr}/api"),
            requests,
        }
    }
}

async fn serve_one(mut socket: TcpStream, status: &str) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let (head_end, length) = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            break (split + 4, length);
        }
    };
    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let reply = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    socket.write_all(reply.as_bytes()).await.ok()?;

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut request_line = head.lines().next()?.split_whitespace();
    Some(RecordedRequest {
        method: request_line.next()?.to_string(),
        path: request_line.next()?.to_string(),
        body: String::from_utf8_lossy(&buf[head_end..]).to_string(),
    })
}
