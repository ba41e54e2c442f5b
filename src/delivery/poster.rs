//! HTTP delivery with bounded inline retries.
//!
//! One hyper client is shared by the inline path and the queue drainer.
//! Response classification:
//!
//! - `2xx` — delivered.
//! - `4xx` except 429 — rejected: the request is never retried inline,
//!   but the record is still enqueued (the receiver may be transiently
//!   misconfigured and the timing data is too valuable to drop).
//! - `429`, `5xx`, network errors, timeouts — retryable.

use std::collections::BTreeMap;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PostConfig;
use crate::error::{BridgeError, Result};

/// Classification of a single POST attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx response.
    Delivered,
    /// Non-429 4xx: do not retry this request inline.
    Rejected(u16),
    /// Worth another attempt; carries the failure description used as
    /// `last_error` when the record is enqueued.
    Retryable(String),
}

/// Result of the inline attempt-plus-retries sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// All inline attempts failed; the record belongs in the queue.
    Failed { last_error: String },
}

/// Map a response status to an [`Outcome`].
pub fn classify(status: StatusCode) -> Outcome {
    if status.is_success() {
        Outcome::Delivered
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Outcome::Retryable(format!("HTTP {}", status.as_u16()))
    } else if status.is_client_error() {
        Outcome::Rejected(status.as_u16())
    } else {
        Outcome::Retryable(format!("HTTP {}", status.as_u16()))
    }
}

/// Shared HTTP client bound to the configured record endpoint.
pub struct Poster {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    uri: Uri,
    method: Method,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    retry_multiplier: f64,
}

impl Poster {
    /// Build from config. Fails fast on an unusable URL or method.
    pub fn new(post: &PostConfig, url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| BridgeError::Config(format!("invalid post URL {url:?}: {e}")))?;
        let method = Method::from_bytes(post.method.as_bytes())
            .map_err(|e| BridgeError::Config(format!("invalid method {:?}: {e}", post.method)))?;

        let client = Client::builder(TokioExecutor::new()).build(HttpsConnector::new());

        Ok(Self {
            client,
            uri,
            method,
            headers: post.headers.clone(),
            timeout: Duration::from_millis(post.timeout_ms),
            retries: post.retries,
            retry_delay: Duration::from_millis(post.retry_delay_ms),
            retry_multiplier: post.retry_backoff_multiplier,
        })
    }

    /// One POST of `body` to the configured endpoint.
    pub async fn post(&self, body: &Value) -> Outcome {
        self.send(self.method.clone(), self.uri.clone(), &self.headers, body)
            .await
    }

    /// One POST of a queued entry to its stored target.
    pub async fn post_stored(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> Outcome {
        let uri: Uri = match url.parse() {
            Ok(uri) => uri,
            Err(e) => return Outcome::Retryable(format!("invalid stored URL {url:?}: {e}")),
        };
        let method = match Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(e) => return Outcome::Retryable(format!("invalid stored method {method:?}: {e}")),
        };
        self.send(method, uri, headers, body).await
    }

    /// The configured endpoint's URL (stored into queue entries).
    pub fn url(&self) -> String {
        self.uri.to_string()
    }

    /// The configured method (stored into queue entries).
    pub fn method(&self) -> String {
        self.method.to_string()
    }

    /// Headers applied to every request.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Initial attempt plus up to `retries` inline retries with
    /// exponentially-spaced sleeps. A `Rejected` outcome short-circuits.
    pub async fn deliver(&self, body: &Value) -> DeliveryResult {
        let mut last_error = String::new();

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let sleep_ms = self.retry_delay.as_millis() as f64
                    * self.retry_multiplier.powi(attempt as i32 - 1);
                debug!(attempt, sleep_ms, "retrying POST");
                tokio::time::sleep(Duration::from_millis(sleep_ms.round() as u64)).await;
            }

            match self.post(body).await {
                Outcome::Delivered => return DeliveryResult::Delivered,
                Outcome::Rejected(status) => {
                    warn!(status, "endpoint rejected record");
                    return DeliveryResult::Failed {
                        last_error: format!("HTTP {status}"),
                    };
                }
                Outcome::Retryable(reason) => {
                    debug!(attempt, %reason, "POST attempt failed");
                    last_error = reason;
                }
            }
        }

        DeliveryResult::Failed { last_error }
    }

    async fn send(
        &self,
        method: Method,
        uri: Uri,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> Outcome {
        let bytes = match serde_json::to_vec(body) {
            Ok(b) => b,
            Err(e) => return Outcome::Retryable(format!("body serialization: {e}")),
        };

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = match builder.body(Full::new(Bytes::from(bytes))) {
            Ok(r) => r,
            Err(e) => return Outcome::Retryable(format!("request build: {e}")),
        };

        match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                // Drain the body so the connection can be reused.
                let _ = response.into_body().collect().await;
                classify(status)
            }
            Ok(Err(e)) => Outcome::Retryable(e.to_string()),
            Err(_) => Outcome::Retryable(format!("timeout after {}ms", self.timeout.as_millis())),
        }
    }
}
