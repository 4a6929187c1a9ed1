//! Resilient HTTP execution
//!
//! Every outbound call goes through [`HttpExecutor::execute`], which encodes
//! the request body once, replays it on each attempt, retries transport
//! failures, 5xx and 429 with exponential backoff, and races every wait
//! against the caller's [`CancellationToken`].
//!
//! All error text leaving this module has been through [`redact::redact`].

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::HttpError;

pub mod redact;

use redact::redact;

pub use reqwest::header::HeaderMap;
pub use reqwest::Method;

/// Upper bound for a single backoff wait
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry count used when the configuration does not set one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Bytes of an error response body kept for the error message
pub const ERROR_BODY_LIMIT: usize = 1024;

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(180);
const MAX_IDLE_PER_HOST: usize = 5;
const MAX_POOLED_BUFFERS: usize = 16;
const INITIAL_BUFFER_CAPACITY: usize = 1024;
// Oversized buffers are dropped instead of pooled.
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

const USER_AGENT: &str = concat!("quotecast/", env!("CARGO_PKG_VERSION"));

/// How many times a request is retried and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    /// Wait before the first retry; doubled for every retry after it
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    /// Wait after the given (1-based) failed attempt: `base * 2^(attempt-1)`,
    /// clamped to [`MAX_BACKOFF`]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, Duration::from_secs(2))
    }
}

/// A successful (2xx/3xx) response with its body fully read
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    body: Bytes,
}

impl HttpResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            HttpError::Decode(format!("Failed to decode response: {}", redact(&e.to_string())))
        })
    }
}

/// Build the header map for a bearer call
pub fn bearer_headers(token: &str) -> Result<HeaderMap, HttpError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        HttpError::Decode("Credential contains characters not allowed in a header".to_string())
    })?;
    value.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// Executes HTTP requests with retry, backoff and redaction
pub struct HttpExecutor {
    client: reqwest::Client,
    policy: RetryPolicy,
    buffers: BufferPool,
}

impl HttpExecutor {
    /// Create an executor whose individual requests time out after `timeout`
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                HttpError::Transport(format!(
                    "Failed to build HTTP client: {}",
                    redact(&e.to_string())
                ))
            })?;

        Ok(Self {
            client,
            policy,
            buffers: BufferPool::new(MAX_POOLED_BUFFERS),
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send a request, retrying retryable failures
    ///
    /// `body` is serialized as JSON exactly once and the same bytes are sent
    /// on every attempt.
    ///
    /// # Errors
    ///
    /// - `HttpError::Status` for a non-retryable status (any 4xx except 429)
    /// - `HttpError::Exhausted` when the last permitted attempt failed
    /// - `HttpError::Cancelled` as soon as `cancel` fires
    /// - `HttpError::Decode` if the body cannot be serialized
    pub async fn execute<B>(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
        body: Option<&B>,
        headers: HeaderMap,
    ) -> Result<HttpResponse, HttpError>
    where
        B: Serialize + ?Sized,
    {
        let payload = match body {
            Some(body) => Some(self.encode(body)?),
            None => None,
        };

        let total = self.policy.total_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self
                .send_once(cancel, &method, url, payload.clone(), &headers)
                .await
            {
                Ok(response) => {
                    if attempt > 1 {
                        debug!("{} {} succeeded on attempt {}", method, redact(url), attempt);
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            if attempt >= total {
                warn!(
                    "{} {} failed after {} attempts: {}",
                    method,
                    redact(url),
                    attempt,
                    error
                );
                return Err(HttpError::Exhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.policy.backoff_for(attempt);
            if error.is_rate_limited() {
                warn!(
                    "Rate limit exceeded (attempt {}/{}), backing off for {:?}",
                    attempt, total, delay
                );
            } else {
                warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {:?}",
                    attempt, total, error, delay
                );
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(HttpError::Cancelled(format!(
                        "cancelled during backoff after attempt {}",
                        attempt
                    )));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn encode<B: Serialize + ?Sized>(&self, body: &B) -> Result<Bytes, HttpError> {
        let mut buffer = self.buffers.acquire();
        serde_json::to_writer(&mut *buffer, body)
            .map_err(|e| HttpError::Decode(format!("Failed to encode request body: {}", e)))?;
        Ok(Bytes::copy_from_slice(&buffer))
    }

    async fn send_once(
        &self,
        cancel: &CancellationToken,
        method: &Method,
        url: &str,
        payload: Option<Bytes>,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, HttpError> {
        let mut request = self.client.request(method.clone(), url).headers(headers.clone());
        if let Some(payload) = payload {
            if !headers.contains_key(CONTENT_TYPE) {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = request.body(payload);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(HttpError::Cancelled("cancelled while waiting for response".to_string()));
            }
            result = request.send() => {
                result.map_err(|e| HttpError::Transport(redact(&e.to_string())))?
            }
        };

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(HttpError::Cancelled("cancelled while reading error body".to_string()));
                }
                body = read_limited(response, ERROR_BODY_LIMIT) => body,
            };

            let reason = status.canonical_reason().unwrap_or("Unknown status");
            let message = if body.is_empty() {
                reason.to_string()
            } else {
                format!("{}: {}", reason, redact(&body))
            };

            return Err(HttpError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(HttpError::Cancelled("cancelled while reading response".to_string()));
            }
            body = response.bytes() => {
                body.map_err(|e| HttpError::Transport(redact(&e.to_string())))?
            }
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Read at most `limit` bytes of a response body
async fn read_limited(mut response: reqwest::Response, limit: usize) -> String {
    let mut captured = Vec::with_capacity(limit.min(INITIAL_BUFFER_CAPACITY));
    while captured.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = (limit - captured.len()).min(chunk.len());
                captured.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

/// Pool of reusable serialization buffers
struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl BufferPool {
    fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    fn acquire(&self) -> PooledBuffer<'_> {
        let buffer = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_BUFFER_CAPACITY));
        PooledBuffer { buffer, pool: self }
    }

    fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buffer.clear();

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buffer);
        }
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

/// Buffer on loan from a [`BufferPool`]; goes back to the pool on drop
struct PooledBuffer<'a> {
    buffer: Vec<u8>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}
