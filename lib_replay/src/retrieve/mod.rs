//! # Data Retrieval Module
//!
//! HTTP plumbing shared by the rest of the library.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff.
//! - **`backend_sink`**: the `BatchSink` that persists emitted records by
//!   posting them to the storage backend through `ApiClient`.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// HTTP persistence sink.
pub mod backend_sink;

pub use backend_sink::{HttpBackendSink, SinkError};
pub use ky_http::{ApiClient, ApiResponse};
