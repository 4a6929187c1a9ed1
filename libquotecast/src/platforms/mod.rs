//! Platform abstraction and implementations
//!
//! A [`Platform`] validates and publishes text posts. Quotecast ships one
//! real implementation ([`bluesky::BlueskyClient`]) and a configurable
//! [`mock::MockPlatform`] for tests.
//!
//! # Examples
//!
//! ```no_run
//! use libquotecast::config::Config;
//! use libquotecast::platforms::{bluesky::BlueskyClient, Platform};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> libquotecast::error::Result<()> {
//! let config = Config::load()?;
//! let platform = BlueskyClient::connect(&config).await?;
//!
//! let content = "Simplicity is prerequisite for reliability.\n- Edsger W. Dijkstra";
//! platform.validate_content(content)?;
//!
//! let uri = platform.post(&CancellationToken::new(), content).await?;
//! println!("Posted: {}", uri);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod bluesky;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Unified interface for publishing a text post
#[async_trait]
pub trait Platform: Send + Sync {
    /// Post content to the platform
    ///
    /// Returns the platform-specific post ID (an `at://` URI for Bluesky).
    /// The operation stops as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after the platform's own
    /// recovery (retries, credential refresh) has been exhausted.
    async fn post(&self, cancel: &CancellationToken, content: &str) -> Result<String>;

    /// Validate content before posting
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Validation` if the content fails validation
    fn validate_content(&self, content: &str) -> Result<()>;

    /// Lowercase identifier for the platform (e.g. "bluesky")
    fn name(&self) -> &str;

    /// Maximum number of characters allowed in a post, or `None` if there
    /// is no hard limit
    fn character_limit(&self) -> Option<usize>;
}
