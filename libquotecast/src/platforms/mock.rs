//! Mock platform implementation for testing
//!
//! A configurable platform that can simulate successes, failures, delays and
//! character limits. It records every post it receives so tests of the
//! posting pipeline can run without a PDS.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{HttpError, PlatformError, Result};
use crate::platforms::Platform;

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Platform name (e.g., "mock-bluesky")
    pub name: String,

    /// Whether posting should succeed
    pub post_succeeds: bool,

    /// Error to return on posting failure
    pub post_error: Option<String>,

    /// Delay before completing a post (simulates network latency)
    pub delay: Duration,

    /// Character limit for validation
    pub character_limit: Option<usize>,

    /// Number of times post has been called
    pub post_call_count: Arc<Mutex<usize>>,

    /// Posts that have been made (for verification)
    pub posted_content: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            post_succeeds: true,
            post_error: None,
            delay: Duration::ZERO,
            character_limit: None,
            post_call_count: Arc::new(Mutex::new(0)),
            posted_content: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock platform for testing
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock platform that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Create a mock platform that fails posting
    pub fn post_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            post_succeeds: false,
            post_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    pub fn with_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            character_limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn post_call_count(&self) -> usize {
        *self.config.post_call_count.lock()
    }

    pub fn posted_content(&self) -> Vec<String> {
        self.config.posted_content.lock().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn post(&self, cancel: &CancellationToken, content: &str) -> Result<String> {
        let call = {
            let mut count = self.config.post_call_count.lock();
            *count += 1;
            *count
        };

        if !self.config.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(HttpError::Cancelled("mock post cancelled".to_string()).into());
                }
                _ = tokio::time::sleep(self.config.delay) => {}
            }
        }

        if self.config.post_succeeds {
            self.config.posted_content.lock().push(content.to_string());
            Ok(format!("at://{}/mock/{}", self.config.name, call))
        } else {
            let error_msg = self
                .config
                .post_error
                .clone()
                .unwrap_or_else(|| "Mock posting failed".to_string());
            Err(PlatformError::Posting(error_msg).into())
        }
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        if let Some(limit) = self.config.character_limit {
            let length = content.chars().count();
            if length > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {} character limit (got {} characters)",
                    limit, length
                ))
                .into());
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }
}
