//! Bluesky platform implementation
//!
//! Posts are created with a direct XRPC call to the account's PDS. The
//! access token comes from the shared [`CredentialManager`]; a 401 triggers
//! one session refresh and one more attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credentials::{AesGcmCipher, CredentialCipher, CredentialManager};
use crate::error::{PlatformError, Result};
use crate::platforms::Platform;
use crate::transport::{bearer_headers, HttpExecutor, Method};

pub const CREATE_RECORD_PATH: &str = "/xrpc/com.atproto.repo.createRecord";
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Bluesky's limit for the text of a post
pub const CHARACTER_LIMIT: usize = 300;

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    repo: &'a str,
    collection: &'static str,
    record: PostRecord<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord<'a> {
    #[serde(rename = "$type")]
    record_type: &'static str,
    text: &'a str,
    created_at: String,
    facets: [(); 0],
}

impl<'a> CreateRecordRequest<'a> {
    fn new(repo: &'a str, text: &'a str, created_at: DateTime<Utc>) -> Self {
        Self {
            repo,
            collection: POST_COLLECTION,
            record: PostRecord {
                record_type: POST_COLLECTION,
                text,
                created_at: created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                facets: [],
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreatedRecord {
    uri: String,
    cid: String,
}

pub struct BlueskyClient {
    http: Arc<HttpExecutor>,
    credentials: Arc<CredentialManager>,
    create_record_url: String,
    did: String,
}

impl BlueskyClient {
    /// Create a client for the account `did` on the PDS at `pds_url`
    pub fn new(
        http: Arc<HttpExecutor>,
        credentials: Arc<CredentialManager>,
        pds_url: &str,
        did: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            create_record_url: format!("{}{}", pds_url.trim_end_matches('/'), CREATE_RECORD_PATH),
            did: did.into(),
        }
    }

    /// Build the whole posting stack from configuration
    ///
    /// Creates the cipher, the HTTP executor and the credential manager
    /// (which performs its startup refresh here).
    pub async fn connect(config: &Config) -> Result<Self> {
        let http = Arc::new(HttpExecutor::new(config.http.timeout, config.retry_policy())?);
        let cipher: Arc<dyn CredentialCipher> = Arc::new(AesGcmCipher::new());

        let credentials = CredentialManager::start(
            config.session_settings(),
            config.seed_credentials(),
            cipher,
            Arc::clone(&http),
        )
        .await?;

        debug!("Bluesky client ready for {}", config.bluesky.did);

        Ok(Self::new(
            http,
            Arc::new(credentials),
            &config.bluesky.pds_url,
            config.bluesky.did.clone(),
        ))
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    async fn create_record(
        &self,
        cancel: &CancellationToken,
        request: &CreateRecordRequest<'_>,
    ) -> Result<String> {
        let access = self.credentials.access_token()?;
        let headers = bearer_headers(access.expose_secret())?;

        let response = self
            .http
            .execute(
                cancel,
                Method::POST,
                &self.create_record_url,
                Some(request),
                headers,
            )
            .await?;

        let record = match response.json::<CreatedRecord>() {
            Ok(record) => record,
            Err(e) => {
                warn!("Post was accepted but the response could not be read: {}", e);
                CreatedRecord::default()
            }
        };
        debug!("Created record {} (cid {})", record.uri, record.cid);

        Ok(record.uri)
    }
}

#[async_trait]
impl Platform for BlueskyClient {
    async fn post(&self, cancel: &CancellationToken, content: &str) -> Result<String> {
        debug!("Posting to Bluesky: {} characters", content.chars().count());

        let request = CreateRecordRequest::new(&self.did, content, Utc::now());

        match self.create_record(cancel, &request).await {
            Err(e) if e.is_unauthorized() => {
                warn!("Bluesky rejected the access token, refreshing session and retrying once");
                self.credentials.refresh(cancel).await?;
                let uri = self.create_record(cancel, &request).await?;
                info!("Post succeeded after session refresh");
                Ok(uri)
            }
            result => result,
        }
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        let length = content.chars().count();
        if length > CHARACTER_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Bluesky's {} character limit (current: {} characters)",
                CHARACTER_LIMIT, length
            ))
            .into());
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "bluesky"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{SeedCredentials, SessionSettings};
    use crate::transport::RetryPolicy;
    use secrecy::SecretString;
    use std::time::Duration;
    use wiremock::MockServer;

    async fn client(server: &MockServer) -> BlueskyClient {
        let http = Arc::new(
            HttpExecutor::new(Duration::from_secs(5), RetryPolicy::new(0, Duration::ZERO))
                .unwrap(),
        );
        let credentials = CredentialManager::start(
            SessionSettings {
                pds_url: server.uri(),
                refresh_interval: Duration::from_secs(3600),
                refresh_timeout: Duration::from_secs(5),
            },
            SeedCredentials {
                access: SecretString::from("A0.x".to_string()),
                refresh: SecretString::from("R0.x".to_string()),
            },
            Arc::new(AesGcmCipher::new()),
            Arc::clone(&http),
        )
        .await
        .unwrap();

        BlueskyClient::new(http, Arc::new(credentials), &server.uri(), "did:plc:test")
    }

    #[test]
    fn test_request_body_shape() {
        let created_at = DateTime::parse_from_rfc3339("2024-05-01T12:30:45.123Z")
            .unwrap()
            .with_timezone(&Utc);
        let request = CreateRecordRequest::new("did:plc:test", "Hello\n- World", created_at);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "repo": "did:plc:test",
                "collection": "app.bsky.feed.post",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "text": "Hello\n- World",
                    "createdAt": "2024-05-01T12:30:45Z",
                    "facets": []
                }
            })
        );
    }

    #[test]
    fn test_created_record_is_lenient() {
        let record: CreatedRecord = serde_json::from_str(r#"{"cid":"bafy"}"#).unwrap();
        assert_eq!(record.uri, "");
        assert_eq!(record.cid, "bafy");
    }

    #[tokio::test]
    async fn test_validate_content_empty() {
        let server = MockServer::start().await;
        let client = client(&server).await;

        let result = client.validate_content("");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Content cannot be empty"));

        assert!(client.validate_content("   \n").is_err());
    }

    #[tokio::test]
    async fn test_validate_content_limits() {
        let server = MockServer::start().await;
        let client = client(&server).await;

        assert!(client.validate_content(&"a".repeat(300)).is_ok());

        let result = client.validate_content(&"a".repeat(301));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("300 character limit"));
        assert!(message.contains("301"));

        // Counted in characters, not bytes
        assert!(client.validate_content(&"é".repeat(300)).is_ok());
    }

    #[tokio::test]
    async fn test_platform_identity() {
        let server = MockServer::start().await;
        let client = client(&server).await;

        assert_eq!(client.name(), "bluesky");
        assert_eq!(client.character_limit(), Some(300));
        assert_eq!(
            client.create_record_url,
            format!("{}/xrpc/com.atproto.repo.createRecord", server.uri())
        );
    }
}
