//! Bearer credential lifecycle
//!
//! [`CredentialManager`] owns the access/refresh JWT pair for one account.
//! Both values are kept encrypted with a process-local key (see [`cipher`])
//! and decrypted lazily into a plaintext cache on first use. A background
//! task rotates the pair on a fixed interval; callers can also force a
//! rotation with [`CredentialManager::refresh`], for example after a 401.
//!
//! # Locking
//!
//! The plaintext cache and the sealed store sit behind separate locks. Any
//! path that needs both takes the cache lock first. A refresh encrypts the
//! new values before taking either lock, so a failed refresh leaves the
//! previous pair fully intact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, CredentialError, ErrorKind, HttpError, Result};
use crate::transport::{bearer_headers, HttpExecutor, Method};

pub mod cipher;


pub use cipher::{AesGcmCipher, CredentialCipher};

pub const REFRESH_SESSION_PATH: &str = "/xrpc/com.atproto.server.refreshSession";

/// Which half of the session a caller wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialKind::Access => write!(f, "access"),
            CredentialKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// Where and how often the session is rotated
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub pds_url: String,
    pub refresh_interval: Duration,
    /// Deadline for a single refresh, retries included
    pub refresh_timeout: Duration,
}

/// Initial tokens handed to the manager
///
/// Either value may already be ciphertext produced by the same cipher.
pub struct SeedCredentials {
    pub access: SecretString,
    pub refresh: SecretString,
}

/// Observable state of a [`CredentialManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Serving credentials, no refresh running
    Active,
    /// Serving credentials while a refresh is in flight
    Refreshing,
    /// Shutdown requested, background task not yet finished
    ShuttingDown,
    /// Background task has exited
    Stopped,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedSession {
    #[serde(default)]
    access_jwt: String,
    #[serde(default)]
    refresh_jwt: String,
}

#[derive(Default)]
struct Plaintext {
    access: Option<SecretString>,
    refresh: Option<SecretString>,
}

impl Plaintext {
    fn get(&self, kind: CredentialKind) -> Option<SecretString> {
        let slot = match kind {
            CredentialKind::Access => &self.access,
            CredentialKind::Refresh => &self.refresh,
        };
        slot.as_ref().map(duplicate)
    }

    fn set(&mut self, kind: CredentialKind, value: SecretString) {
        match kind {
            CredentialKind::Access => self.access = Some(value),
            CredentialKind::Refresh => self.refresh = Some(value),
        }
    }
}

#[derive(Clone)]
struct Sealed {
    access: String,
    refresh: String,
}

impl Sealed {
    fn get(&self, kind: CredentialKind) -> &str {
        match kind {
            CredentialKind::Access => &self.access,
            CredentialKind::Refresh => &self.refresh,
        }
    }
}

fn duplicate(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

struct Session {
    cipher: Arc<dyn CredentialCipher>,
    http: Arc<HttpExecutor>,
    refresh_url: String,
    refresh_timeout: Duration,
    cache: RwLock<Plaintext>,
    sealed: RwLock<Sealed>,
    refreshes_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a refresh ends, however it ends
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Session {
    fn seed(
        settings: &SessionSettings,
        seeds: SeedCredentials,
        cipher: Arc<dyn CredentialCipher>,
        http: Arc<HttpExecutor>,
    ) -> Result<Self> {
        let mut cache = Plaintext::default();

        let access = seal_seed(
            cipher.as_ref(),
            &mut cache,
            CredentialKind::Access,
            seeds.access,
        )?;
        let refresh = seal_seed(
            cipher.as_ref(),
            &mut cache,
            CredentialKind::Refresh,
            seeds.refresh,
        )?;

        Ok(Self {
            cipher,
            http,
            refresh_url: format!(
                "{}{}",
                settings.pds_url.trim_end_matches('/'),
                REFRESH_SESSION_PATH
            ),
            refresh_timeout: settings.refresh_timeout,
            cache: RwLock::new(cache),
            sealed: RwLock::new(Sealed { access, refresh }),
            refreshes_in_flight: AtomicUsize::new(0),
        })
    }

    fn credential(&self, kind: CredentialKind) -> std::result::Result<SecretString, CredentialError> {
        if let Some(value) = self.cache.read().get(kind) {
            return Ok(value);
        }

        let mut cache = self.cache.write();
        // Another caller may have filled the slot while we waited
        if let Some(value) = cache.get(kind) {
            return Ok(value);
        }

        let plaintext = {
            let sealed = self.sealed.read();
            self.cipher.decrypt(sealed.get(kind))?
        };
        let value = SecretString::from(plaintext);
        cache.set(kind, duplicate(&value));
        debug!("Decrypted {} credential into cache", kind);

        Ok(value)
    }

    async fn refresh(&self, cancel: &CancellationToken) -> Result<()> {
        let _in_flight = InFlight::enter(&self.refreshes_in_flight);

        let refresh_token = self.credential(CredentialKind::Refresh)?;
        let headers = bearer_headers(refresh_token.expose_secret())?;

        let response = self
            .http
            .execute(cancel, Method::POST, &self.refresh_url, None::<&()>, headers)
            .await?;

        let session: RefreshedSession = response.json()?;
        if session.access_jwt.is_empty() || session.refresh_jwt.is_empty() {
            return Err(HttpError::Decode(
                "Refresh response is missing accessJwt or refreshJwt".to_string(),
            )
            .into());
        }

        let sealed_access = self.cipher.encrypt(&session.access_jwt)?;
        let sealed_refresh = self.cipher.encrypt(&session.refresh_jwt)?;

        let mut cache = self.cache.write();
        let mut sealed = self.sealed.write();
        cache.set(CredentialKind::Access, SecretString::from(session.access_jwt));
        cache.set(CredentialKind::Refresh, SecretString::from(session.refresh_jwt));
        sealed.access = sealed_access;
        sealed.refresh = sealed_refresh;

        Ok(())
    }

    async fn refresh_within_deadline(&self, cancel: &CancellationToken) -> Result<()> {
        match tokio::time::timeout(self.refresh_timeout, self.refresh(cancel)).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::Cancelled(format!(
                "refresh did not finish within {}",
                humantime::format_duration(self.refresh_timeout)
            ))
            .into()),
        }
    }
}

fn seal_seed(
    cipher: &dyn CredentialCipher,
    cache: &mut Plaintext,
    kind: CredentialKind,
    seed: SecretString,
) -> std::result::Result<String, CredentialError> {
    let value = seed.expose_secret();
    if cipher.is_encrypted(value) {
        debug!("Seed {} credential looks encrypted, storing as provided", kind);
        return Ok(value.to_string());
    }

    let sealed = cipher.encrypt(value)?;
    cache.set(kind, seed);
    Ok(sealed)
}

/// Holds and rotates the session tokens for one account
pub struct CredentialManager {
    session: Arc<Session>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CredentialManager {
    /// Seed the store, attempt one refresh, then start the background cycle
    ///
    /// A failed startup refresh is logged and otherwise ignored: the seed
    /// tokens stay in place and the background cycle tries again later.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(
        settings: SessionSettings,
        seeds: SeedCredentials,
        cipher: Arc<dyn CredentialCipher>,
        http: Arc<HttpExecutor>,
    ) -> Result<Self> {
        if settings.refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "refresh_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        for (kind, seed) in [
            (CredentialKind::Access, &seeds.access),
            (CredentialKind::Refresh, &seeds.refresh),
        ] {
            if seed.expose_secret().trim().is_empty() {
                return Err(ConfigError::MissingField(format!("{} credential seed", kind)).into());
            }
        }

        let session = Arc::new(Session::seed(&settings, seeds, cipher, http)?);
        let shutdown = CancellationToken::new();

        match session.refresh_within_deadline(&shutdown).await {
            Ok(()) => info!("Startup credential refresh succeeded"),
            Err(e) => warn!("Startup credential refresh failed, keeping seed credentials: {}", e),
        }

        let worker = tokio::spawn(refresh_cycle(
            Arc::clone(&session),
            settings.refresh_interval,
            shutdown.clone(),
        ));

        Ok(Self {
            session,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Current plaintext value of one credential
    ///
    /// Decrypts at most once per stored value; later calls are served from
    /// the cache.
    pub fn credential(&self, kind: CredentialKind) -> Result<SecretString> {
        Ok(self.session.credential(kind)?)
    }

    pub fn access_token(&self) -> Result<SecretString> {
        self.credential(CredentialKind::Access)
    }

    /// Exchange the refresh token for a new pair
    ///
    /// On failure nothing is changed and the previous pair stays usable.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<()> {
        self.session.refresh(cancel).await
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.shutdown.is_cancelled() {
            let finished = self
                .worker
                .lock()
                .as_ref()
                .map_or(true, |handle| handle.is_finished());
            return if finished {
                Lifecycle::Stopped
            } else {
                Lifecycle::ShuttingDown
            };
        }

        if self.session.refreshes_in_flight.load(Ordering::SeqCst) > 0 {
            Lifecycle::Refreshing
        } else {
            Lifecycle::Active
        }
    }

    /// Ask the background cycle to stop. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Stopping background credential refresh");
        }
        self.shutdown.cancel();
    }

    /// Stop the background cycle and wait for it to exit
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Background credential refresh task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CredentialManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("refresh_url", &self.session.refresh_url)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

async fn refresh_cycle(session: Arc<Session>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Background credential refresh every {}",
        humantime::format_duration(period)
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match session.refresh_within_deadline(&shutdown).await {
                    Ok(()) => info!("Credentials refreshed"),
                    Err(e) if e.kind() == ErrorKind::Cancelled && shutdown.is_cancelled() => {
                        debug!("Credential refresh interrupted by shutdown");
                    }
                    Err(e) => warn!("Background credential refresh failed: {}", e),
                }
            }
        }
    }

    debug!("Background credential refresh stopped");
}
