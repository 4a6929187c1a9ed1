//! Error types for Quotecast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuotecastError>;

/// Coarse classification of a failure, used by callers that need to decide
/// what to do next without inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No HTTP response was obtained
    Transport,
    /// The server answered with a non-success status
    Status,
    /// A payload could not be encoded or decoded
    Decode,
    /// Stored credentials could not be encrypted or decrypted
    Credential,
    /// The caller cancelled the operation or its deadline passed
    Cancelled,
    Config,
    Validation,
    Quotes,
    /// The operating system refused a local resource (signals, files)
    Io,
}

#[derive(Error, Debug)]
pub enum QuotecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Quote error: {0}")]
    Quotes(#[from] QuoteError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuotecastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            QuotecastError::Config(_) => 2,
            _ => 1,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QuotecastError::Config(_) => ErrorKind::Config,
            QuotecastError::Http(e) => e.kind(),
            QuotecastError::Credential(_) => ErrorKind::Credential,
            QuotecastError::Platform(_) => ErrorKind::Validation,
            QuotecastError::Quotes(_) => ErrorKind::Quotes,
            QuotecastError::Io(_) => ErrorKind::Io,
        }
    }

    /// HTTP status carried by the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            QuotecastError::Http(e) => e.status(),
            _ => None,
        }
    }

    /// True when the server rejected the bearer credential (HTTP 401)
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Failure of an outbound HTTP call
///
/// Messages are redacted before they are stored, so every variant is safe to
/// log as-is.
#[derive(Error, Debug, Clone)]
pub enum HttpError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Payload error: {0}")]
    Decode(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Request failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<HttpError>,
    },
}

impl HttpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::Transport(_) => ErrorKind::Transport,
            HttpError::Status { .. } => ErrorKind::Status,
            HttpError::Decode(_) => ErrorKind::Decode,
            HttpError::Cancelled(_) => ErrorKind::Cancelled,
            HttpError::Exhausted { source, .. } => source.kind(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            HttpError::Exhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether the generic retry loop may try this request again
    ///
    /// Transport failures, 5xx and 429 are retryable. Every other status is
    /// final, as are payload errors and cancellation.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Transport(_) => true,
            HttpError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            HttpError::Decode(_) | HttpError::Cancelled(_) | HttpError::Exhausted { .. } => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}

#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    #[error("Secure random source unavailable: {0}")]
    Randomness(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Stored credential is not valid base64: {0}")]
    Encoding(String),

    #[error("Stored credential failed authentication: {0}")]
    Authentication(String),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),
}

#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("Failed to read quotes file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse quotes file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No quotes available")]
    Empty,
}
