//! Quote posting orchestration
//!
//! [`QuotePoster`] ties a [`QuoteBook`] to a [`Platform`]: pick a quote,
//! format it, validate it against the platform's rules and publish it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::platforms::Platform;
use crate::quotes::{Quote, QuoteBook};

/// Result of posting one quote
#[derive(Debug, Clone)]
pub struct PostResult {
    /// Platform name (e.g., "bluesky")
    pub platform: String,
    /// Whether the post was successful
    pub success: bool,
    /// Platform-specific post ID (if successful)
    pub post_id: Option<String>,
    /// Error message (if failed)
    pub error: Option<String>,
    /// Text that was sent
    pub content: String,
}

pub struct QuotePoster {
    quotes: QuoteBook,
    platform: Arc<dyn Platform>,
}

impl QuotePoster {
    pub fn new(quotes: QuoteBook, platform: Arc<dyn Platform>) -> Self {
        Self { quotes, platform }
    }

    pub fn quotes(&self) -> &QuoteBook {
        &self.quotes
    }

    /// Post a randomly chosen quote
    ///
    /// # Errors
    ///
    /// Fails before anything is sent if there are no quotes or the chosen
    /// quote does not pass the platform's validation. A failure of the post
    /// itself is reported in the returned [`PostResult`].
    pub async fn post_random(&self, cancel: &CancellationToken) -> Result<PostResult> {
        let quote = self.quotes.pick_random()?;
        self.post_quote(cancel, quote).await
    }

    /// Validate and post a specific quote
    pub async fn post_quote(&self, cancel: &CancellationToken, quote: &Quote) -> Result<PostResult> {
        let content = quote.format();
        self.platform.validate_content(&content)?;

        let platform = self.platform.name().to_string();
        match self.platform.post(cancel, &content).await {
            Ok(post_id) => {
                info!("Posted quote by {} to {}: {}", quote.author, platform, post_id);
                Ok(PostResult {
                    platform,
                    success: true,
                    post_id: Some(post_id),
                    error: None,
                    content,
                })
            }
            Err(e) => {
                error!("Failed to post quote by {} to {}: {}", quote.author, platform, e);
                Ok(PostResult {
                    platform,
                    success: false,
                    post_id: None,
                    error: Some(e.to_string()),
                    content,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, QuotecastError};
    use crate::platforms::mock::MockPlatform;

    fn book() -> QuoteBook {
        QuoteBook::new(vec![Quote::new("Stay hungry, stay foolish.", "Steve Jobs")])
    }

    #[tokio::test]
    async fn test_post_random_success() {
        let platform = Arc::new(MockPlatform::success("mock"));
        let poster = QuotePoster::new(book(), platform.clone());

        let result = poster.post_random(&CancellationToken::new()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.platform, "mock");
        assert_eq!(result.post_id.as_deref(), Some("at://mock/mock/1"));
        assert!(result.error.is_none());
        assert_eq!(
            platform.posted_content(),
            vec!["Stay hungry, stay foolish.\n\u{2015} Steve Jobs".to_string()]
        );
    }

    #[tokio::test]
    async fn test_post_failure_is_reported_in_result() {
        let platform = Arc::new(MockPlatform::post_failure("mock", "Service unavailable"));
        let poster = QuotePoster::new(book(), platform.clone());

        let result = poster.post_random(&CancellationToken::new()).await.unwrap();

        assert!(!result.success);
        assert!(result.post_id.is_none());
        assert!(result.error.unwrap().contains("Service unavailable"));
        assert_eq!(platform.post_call_count(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_sends_nothing() {
        let platform = Arc::new(MockPlatform::with_limit("mock", 10));
        let poster = QuotePoster::new(book(), platform.clone());

        let error = poster
            .post_random(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(platform.post_call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_book_fails() {
        let platform = Arc::new(MockPlatform::success("mock"));
        let poster = QuotePoster::new(QuoteBook::default(), platform.clone());

        let result = poster.post_random(&CancellationToken::new()).await;

        assert!(matches!(result, Err(QuotecastError::Quotes(_))));
        assert_eq!(platform.post_call_count(), 0);
    }
}
