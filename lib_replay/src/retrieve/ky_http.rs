//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with exponential backoff
//! retries for transient failures and standardized JSON response handling.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// Retries applied to transient failures (connect errors, 5xx, 429).
const MAX_RETRIES: u32 = 3;

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized response body. `None` for failures and for empty bodies.
    pub data: Option<T>,
    /// The raw body returned by the server if the request failed.
    pub error_body: Option<String>,
    pub status: u16,
    /// Whether the status code was in the 2xx range.
    pub success: bool,
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client.
///
/// Relative paths are joined onto `base_url`; the base always ends with `/` so
/// that `https://host/api` + `items` resolves to `https://host/api/items`.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client with a per-request `timeout` and the retry policy.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the HTTP client cannot be built.
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let url = Url::parse(&normalized)
            .with_context(|| format!("Invalid base URL (must be absolute): {base_url}"))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs an HTTP request and handles the response.
    ///
    /// # Errors
    /// Returns an error if URL joining, body encoding, or network execution fails,
    /// or if a successful response carries a body that is not valid JSON for `T`.
    /// Non-2xx statuses are not errors; they are reported through `success`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let text = response.text().await?;

        if status.is_success() {
            let data = if text.trim().is_empty() {
                None
            } else {
                Some(serde_json::from_str::<T>(&text)?)
            };
            Ok(ApiResponse {
                data,
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            Ok(ApiResponse {
                data: None,
                error_body: Some(text),
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}
