//! # Backend Persistence Sink
//!
//! Forwards every emitted batch to the storage backend over HTTP:
//!
//! - batches: `POST {base}/page-samples/batch` with a JSON array body
//! - singles: `POST {base}/page-samples` with a JSON object body
//!
//! Each submission runs on its own spawned task, so the caller never waits on
//! the network. Failures are logged there and go no further.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::core::fanout::BatchSink;
use crate::models::PageSample;
use crate::retrieve::ky_http::ApiClient;

const BATCH_PATH: &str = "page-samples/batch";
const SINGLE_PATH: &str = "page-samples";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("backend request failed: {0:#}")]
    Transport(#[from] anyhow::Error),
    #[error("backend rejected submission with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// # HTTP Backend Sink
#[derive(Clone)]
pub struct HttpBackendSink {
    client: Arc<ApiClient>,
}

impl HttpBackendSink {
    /// Builds a sink for the backend rooted at `base_url`; each request gives up
    /// after `timeout` (retries included per attempt).
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Arc::new(ApiClient::new(base_url, None, timeout)?),
        })
    }

    /// Posts a batch and waits for the outcome.
    pub async fn post_batch(&self, batch: &[PageSample]) -> Result<(), SinkError> {
        post(&self.client, BATCH_PATH, batch).await
    }

    /// Posts one record and waits for the outcome.
    pub async fn post_single(&self, record: &PageSample) -> Result<(), SinkError> {
        post(&self.client, SINGLE_PATH, record).await
    }
}

async fn post<B: Serialize + ?Sized>(client: &ApiClient, path: &str, body: &B) -> Result<(), SinkError> {
    let response = client
        .request::<serde_json::Value, _>(Method::POST, path, None, Some(body))
        .await?;
    if response.success {
        Ok(())
    } else {
        Err(SinkError::Rejected {
            status: response.status,
            body: response.error_body.unwrap_or_default(),
        })
    }
}

fn spawn_submission<F>(what: &'static str, records: usize, task: F)
where
    F: std::future::Future<Output = Result<(), SinkError>> + Send + 'static,
{
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        error!(what, records, "No async runtime; submission dropped");
        return;
    };
    handle.spawn(async move {
        match task.await {
            Ok(()) => debug!(what, records, "Backend accepted submission"),
            Err(e @ SinkError::Rejected { .. }) => warn!(what, records, error = %e, "Backend rejected submission"),
            Err(e) => error!(what, records, error = %e, "Backend submission failed"),
        }
    });
}

impl BatchSink for HttpBackendSink {
    fn submit(&self, batch: Arc<[PageSample]>) {
        let sink = self.clone();
        let records = batch.len();
        spawn_submission("batch", records, async move { sink.post_batch(&batch).await });
    }

    fn submit_single(&self, record: PageSample) {
        let sink = self.clone();
        spawn_submission("single", 1, async move { sink.post_single(&record).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one connection, answers with `status`, and returns the raw request.
    async fn one_shot_backend(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}/api"), handle)
    }

    #[tokio::test]
    async fn batch_is_posted_as_json_array() {
        let (base, backend) = one_shot_backend("200 OK").await;
        let sink = HttpBackendSink::new(&base, Duration::from_secs(5)).unwrap();
        let batch = vec![
            PageSample {
                row_key: "r1".into(),
                ..Default::default()
            },
            PageSample {
                row_key: "r2".into(),
                ..Default::default()
            },
        ];

        sink.post_batch(&batch).await.unwrap();

        let request = backend.await.unwrap();
        assert!(request.starts_with("POST /api/page-samples/batch "));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let parsed: Vec<serde_json::Value> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1]["rowKey"], "r2");
    }

    #[tokio::test]
    async fn client_errors_are_reported_as_rejections() {
        let (base, backend) = one_shot_backend("400 Bad Request").await;
        let sink = HttpBackendSink::new(&base, Duration::from_secs(5)).unwrap();

        let err = sink.post_single(&PageSample::default()).await.unwrap_err();

        assert!(matches!(err, SinkError::Rejected { status: 400, .. }));
        let request = backend.await.unwrap();
        assert!(request.starts_with("POST /api/page-samples "));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let sink = HttpBackendSink::new(&format!("http://{addr}"), Duration::from_millis(500)).unwrap();
        let err = sink.post_single(&PageSample::default()).await.unwrap_err();
        assert!(matches!(err, SinkError::Transport(_)));
    }
}
