//! Quotecast - periodic quote posting for Bluesky
//!
//! This library holds everything the `quote-send` daemon needs: session
//! credential management with in-memory encryption and background rotation,
//! a retrying HTTP transport that never leaks tokens into logs, and the
//! Bluesky posting client.

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod poster;
pub mod quotes;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialKind, CredentialManager, Lifecycle};
pub use error::{ErrorKind, QuotecastError, Result};
pub use poster::{PostResult, QuotePoster};
pub use quotes::{Quote, QuoteBook};
pub use transport::{HttpExecutor, RetryPolicy};
