//! Resilient GET client for the upstream statistics API.
//!
//! Status handling per logical call:
//! - 200 decodes the body per [`ResponseKind`].
//! - 403 / 404 fail immediately ([`ApiError::Forbidden`] / [`ApiError::NotFound`]).
//! - 429 with `X-Rate-Limit-Type` waits `Retry-After` seconds, then retries.
//! - any other status (429 without the type header, 5xx, unknown) waits the
//!   policy's default wait, then retries.
//!
//! Waits are constant; the number of attempts is bounded only when
//! [`RetryPolicy::max_attempts`] is set.

pub mod client;
pub mod transport;

pub use client::RestClient;
pub use transport::{RawResponse, ReqwestTransport, Transport};

use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("forbidden endpoint: {url}")]
    Forbidden { url: String },
    #[error("resource not found: {url}")]
    NotFound { url: String },
    #[error("undecodable payload from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("gave up on {url} after {attempts} attempts (last status {last_status:?})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_status: Option<u16>,
    },
}

impl ApiError {
    /// 403/404: the caller should skip the current unit of work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApiError::Forbidden { .. } | ApiError::NotFound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    #[default]
    Json,
    ByteStream,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Bytes(Bytes),
}

impl Payload {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Bytes(_) => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Payload::Bytes(b) => Some(b),
            Payload::Json(_) => None,
        }
    }
}

/// Wait configuration for non-terminal statuses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait after 5xx, unknown statuses, transport errors, and 429 without a rate-limit type.
    pub default_wait: Duration,
    /// Wait after a typed 429 whose `Retry-After` is missing or unparseable.
    pub rate_limit_wait: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_wait: Duration::from_secs(10),
            rate_limit_wait: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn unbounded(default_wait: Duration) -> Self {
        Self {
            default_wait,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.filter(|n| *n > 0);
        self
    }

    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    pub(crate) fn exhausted(&self, attempts: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts >= max)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport used by client, pipeline, and static-data tests.
    use super::transport::{RawResponse, Transport};
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    use reqwest::StatusCode;
    use serde_json::Value;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub url: String,
        pub params: Vec<(String, String)>,
    }

    /// Replays queued responses per URL path suffix; the last response for a
    /// route repeats once the queue drains. Unknown routes answer 404.
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<Vec<(String, VecDeque<RawResponse>)>>,
        calls: Mutex<Vec<Recorded>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn push(&self, suffix: &str, response: RawResponse) {
            let mut routes = self.routes.lock().await;
            if let Some((_, q)) = routes.iter_mut().find(|(s, _)| s == suffix) {
                q.push_back(response);
            } else {
                routes.push((suffix.to_string(), VecDeque::from([response])));
            }
        }

        pub async fn push_json(&self, suffix: &str, body: Value) {
            self.push(suffix, ok_json(body)).await;
        }

        pub async fn calls(&self) -> Vec<Recorded> {
            self.calls.lock().await.clone()
        }

        pub async fn calls_to(&self, suffix: &str) -> usize {
            self.calls
                .lock()
                .await
                .iter()
                .filter(|c| c.url.ends_with(suffix))
                .count()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, params: &[(String, String)]) -> anyhow::Result<RawResponse> {
            self.calls.lock().await.push(Recorded {
                url: url.to_string(),
                params: params.to_vec(),
            });
            let mut routes = self.routes.lock().await;
            // longest matching suffix wins so "/match/1" and "/matchlist/..." never collide
            let hit = routes
                .iter_mut()
                .filter(|(s, _)| url.ends_with(s.as_str()))
                .max_by_key(|(s, _)| s.len());
            match hit {
                Some((_, q)) if q.len() > 1 => Ok(q.pop_front().unwrap_or_else(|| status(404))),
                Some((_, q)) => Ok(q.front().cloned().unwrap_or_else(|| status(404))),
                None => Ok(status(404)),
            }
        }
    }

    pub fn status(code: u16) -> RawResponse {
        RawResponse {
            status: StatusCode::from_u16(code).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok_json(body: Value) -> RawResponse {
        RawResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    /// Header names must be lowercase (`x-rate-limit-type`, `retry-after`).
    pub fn with_headers(mut resp: RawResponse, headers: &[(&'static str, &str)]) -> RawResponse {
        for (k, v) in headers {
            resp.headers
                .insert(HeaderName::from_static(k), HeaderValue::from_str(v).unwrap());
        }
        resp
    }
}
