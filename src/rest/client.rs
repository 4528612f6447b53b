use reqwest::StatusCode;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::transport::{RawResponse, Transport};
use super::{ApiError, Payload, ResponseKind, RetryPolicy};

const RATE_LIMIT_TYPE_HEADER: &str = "X-Rate-Limit-Type";
const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Outcome of inspecting one response.
#[derive(Debug, PartialEq)]
enum Verdict {
    Ok,
    Forbidden,
    NotFound,
    Wait(Duration),
}

/// GET client bound to one endpoint family. Cheap to clone; share one per endpoint.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RestClient {
    pub fn new(base_url: &str, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            policy,
        }
    }

    /// GET `base + path`, retrying non-terminal statuses per the policy.
    /// `base` overrides the client's own base URL (regional endpoints share one client).
    pub async fn fetch(
        &self,
        base: Option<&str>,
        path: &str,
        params: &[(String, String)],
        kind: ResponseKind,
    ) -> Result<Payload, ApiError> {
        let url = format!(
            "{}{}",
            base.map(|b| b.trim_end_matches('/')).unwrap_or(&self.base_url),
            path
        );
        let tag = request_tag(&url);
        debug!(req = %tag, url = %url, params = params.len(), "GET");

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let resp = match self.transport.get(&url, params).await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(req = %tag, error = %err, wait_secs = self.policy.default_wait.as_secs(), "transport error; retrying");
                    self.wait_or_give_up(&tag, &url, attempts, None, self.policy.default_wait)
                        .await?;
                    continue;
                }
            };

            match self.classify(&resp) {
                Verdict::Ok => {
                    info!(req = %tag, status = 200, attempts, "ok");
                    return decode(&url, resp, kind);
                }
                Verdict::Forbidden => {
                    warn!(req = %tag, status = 403, "forbidden endpoint");
                    return Err(ApiError::Forbidden { url });
                }
                Verdict::NotFound => {
                    error!(req = %tag, status = 404, "resource not found");
                    return Err(ApiError::NotFound { url });
                }
                Verdict::Wait(wait) => {
                    let status = Some(resp.status.as_u16());
                    self.wait_or_give_up(&tag, &url, attempts, status, wait)
                        .await?;
                }
            }
        }
    }

    async fn wait_or_give_up(
        &self,
        tag: &str,
        url: &str,
        attempts: u32,
        last_status: Option<u16>,
        wait: Duration,
    ) -> Result<(), ApiError> {
        if self.policy.exhausted(attempts) {
            error!(req = %tag, attempts, "retry bound reached");
            return Err(ApiError::RetriesExhausted {
                url: url.to_string(),
                attempts,
                last_status,
            });
        }
        tokio::time::sleep(wait).await;
        Ok(())
    }

    /// JSON convenience over [`RestClient::fetch`] against the client's own base.
    pub async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        self.get_json_at(None, path, params).await
    }

    pub async fn get_json_at(
        &self,
        base: Option<&str>,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let payload = self.fetch(base, path, params, ResponseKind::Json).await?;
        Ok(payload.into_json().unwrap_or(Value::Null))
    }

    fn classify(&self, resp: &RawResponse) -> Verdict {
        let status = resp.status;
        if status == StatusCode::OK {
            return Verdict::Ok;
        }
        if status == StatusCode::FORBIDDEN {
            return Verdict::Forbidden;
        }
        if status == StatusCode::NOT_FOUND {
            return Verdict::NotFound;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(limit_type) = resp.header(RATE_LIMIT_TYPE_HEADER) {
                let wait = resp
                    .header(RETRY_AFTER_HEADER)
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(self.policy.rate_limit_wait);
                warn!(status = 429, limit_type, wait_secs = wait.as_secs(), "rate limit exceeded; retrying");
                return Verdict::Wait(wait);
            }
            warn!(
                status = 429,
                wait_secs = self.policy.default_wait.as_secs(),
                "rate limited by the underlying service; retrying"
            );
            return Verdict::Wait(self.policy.default_wait);
        }
        if status.is_server_error() {
            warn!(status = status.as_u16(), wait_secs = self.policy.default_wait.as_secs(), "service unavailable; retrying");
        } else {
            warn!(status = status.as_u16(), wait_secs = self.policy.default_wait.as_secs(), "unexpected status; retrying");
        }
        Verdict::Wait(self.policy.default_wait)
    }
}

fn decode(url: &str, resp: RawResponse, kind: ResponseKind) -> Result<Payload, ApiError> {
    match kind {
        ResponseKind::Json => serde_json::from_slice(&resp.body)
            .map(Payload::Json)
            .map_err(|source| ApiError::Decode {
                url: url.to_string(),
                source,
            }),
        ResponseKind::ByteStream => Ok(Payload::Bytes(resp.body)),
    }
}

/// Short stable tag correlating retries of one logical request in the logs.
fn request_tag(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().take(3).map(|b| format!("{:02x}", b)).collect()
}
