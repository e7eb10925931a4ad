//! Credentials manager: the serialized lifecycle of one credential slot.
//!
//! Every operation on a slot runs inside one critical section, in submission
//! order, so at most one decrypt and at most one refresh call is ever in
//! flight per slot:
//!
//! ```text
//! get(request)
//!   → [gate: local authentication]            (get_with_authentication only)
//!   → wait for the slot
//!   → plaintext validity check                 → NoCredentials
//!   → decrypt + tolerant decode                → DeviceIncompatible / KeyInvalidated (slot cleared)
//!   → needs refresh?  no → return cached record
//!   → refresh transport                        → RefreshFailed (store untouched)
//!   → min_ttl check on renewed token           → InsufficientTokenLifetime (store untouched)
//!   → merge + encrypt + persist                → SaveAfterRefreshFailed (may carry renewed record)
//!   → return renewed record
//! ```
//!
//! Persistence is synchronous and happens after the last await point, so a
//! caller that drops a `get` future mid-refresh leaves the slot exactly as it
//! was.

mod blocking;
mod error;


pub use blocking::BlockingCredentialsManager;
pub use error::{CredentialsError, Result};

use crate::auth::{AuthenticationGate, AuthenticationOptions, LocalAuthenticator};
use crate::config::{CacheConfig, StorageBackend};
use crate::credentials::policy::{self, RefreshReason};
use crate::credentials::{
    AesGcmCrypto, CryptoBoundary, CryptoError, Credentials, MemoryStorage, SqliteStorage, Storage,
    StoredCredentials, StoredValue,
};
use crate::refresh::{HttpRefreshTransport, RefreshTransport, RenewRequest};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use error::{KEY_INVALIDATED_ON_GET, KEY_INVALIDATED_ON_SAVE};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Slot name used when none is configured
pub const DEFAULT_SLOT: &str = "credentials";

/// Storage keys of one credential slot.
#[derive(Debug, Clone)]
struct SlotKeys {
    /// Base64 encrypted blob
    blob: String,
    /// Plaintext expiry mirror, epoch ms
    expires_at: String,
    /// Written for older readers, never read
    legacy_expires_at: String,
    can_refresh: String,
}

impl SlotKeys {
    fn new(slot: &str) -> Self {
        Self {
            blob: slot.to_string(),
            expires_at: format!("{}_access_token_expires_at", slot),
            legacy_expires_at: format!("{}_expires_at", slot),
            can_refresh: format!("{}_can_refresh", slot),
        }
    }

    fn all(&self) -> [&str; 4] {
        [
            &self.blob,
            &self.expires_at,
            &self.legacy_expires_at,
            &self.can_refresh,
        ]
    }
}

/// Constraints for one [`CredentialsManager::get`] call.
///
/// The default asks for whatever is stored: no scope change, no minimum
/// lifetime, no forced refresh.
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    /// Scope to request on refresh; a differing scope forces a refresh
    pub scope: Option<String>,
    /// Minimum remaining access token lifetime, in seconds
    pub min_ttl: u64,
    /// Extra parameters for the refresh call
    pub parameters: HashMap<String, String>,
    /// Extra headers for the refresh call
    pub headers: HashMap<String, String>,
    pub force_refresh: bool,
}

impl GetRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn min_ttl(mut self, seconds: u64) -> Self {
        self.min_ttl = seconds;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// Encrypted, self-refreshing credential cache for one slot.
///
/// # Thread Safety
/// - All operations take the slot lock (a FIFO `tokio::sync::Mutex`)
/// - Share across tasks with `Arc<CredentialsManager>`
pub struct CredentialsManager {
    storage: Arc<dyn Storage>,
    crypto: Arc<dyn CryptoBoundary>,
    transport: Arc<dyn RefreshTransport>,
    gate: Option<AuthenticationGate>,
    keys: SlotKeys,
    slot: Mutex<()>,
}

impl CredentialsManager {
    /// Creates a manager for the default slot.
    ///
    /// # Arguments
    /// * `storage` - Persistence adapter holding the slot
    /// * `crypto` - Crypto boundary protecting the blob
    /// * `transport` - Refresh transport used when a refresh is needed
    pub fn new(
        storage: Arc<dyn Storage>,
        crypto: Arc<dyn CryptoBoundary>,
        transport: Arc<dyn RefreshTransport>,
    ) -> Self {
        Self {
            storage,
            crypto,
            transport,
            gate: None,
            keys: SlotKeys::new(DEFAULT_SLOT),
            slot: Mutex::new(()),
        }
    }

    /// Stores the record under `slot` instead of the default.
    pub fn with_slot(mut self, slot: &str) -> Self {
        self.keys = SlotKeys::new(slot);
        self
    }

    /// Enables [`CredentialsManager::get_with_authentication`].
    pub fn with_authenticator(mut self, authenticator: Arc<dyn LocalAuthenticator>) -> Self {
        self.gate = Some(AuthenticationGate::new(authenticator));
        self
    }

    /// Builds storage, crypto and transport from configuration.
    ///
    /// The encryption key is read from the environment variable named by
    /// `config.encryption.key_env`.
    pub fn from_config(config: &CacheConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn Storage> = match config.storage.backend {
            StorageBackend::Sqlite => Arc::new(
                SqliteStorage::new(&config.storage.path).context("Failed to open credential storage")?,
            ),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };

        let key = std::env::var(&config.encryption.key_env)
            .with_context(|| format!("{} is not set", config.encryption.key_env))?;
        let crypto = AesGcmCrypto::from_base64(&key).context("Invalid encryption key")?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.refresh.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        let transport = HttpRefreshTransport::with_client(
            client,
            config.refresh.token_url.clone(),
            config.refresh.client_id.clone(),
        );

        Ok(Self::new(storage, Arc::new(crypto), Arc::new(transport)).with_slot(&config.storage.slot))
    }

    /// Encrypts and stores `credentials`, replacing any previous record.
    ///
    /// # Returns
    /// * `Err(InvalidCredentials)` - Neither an access token nor an ID token
    /// * `Err(DeviceIncompatible)` - Previous record left untouched
    /// * `Err(KeyInvalidated)` - Slot cleared; save again
    pub async fn save(&self, credentials: &Credentials) -> Result<()> {
        let _slot = self.slot.lock().await;
        self.save_locked(credentials)
    }

    /// Returns usable credentials, refreshing them first when required.
    pub async fn get(&self, request: GetRequest) -> Result<Credentials> {
        let _slot = self.slot.lock().await;
        self.get_locked(&request).await
    }

    /// Runs the local authentication ceremony, then behaves like [`get`](Self::get).
    ///
    /// Storage and crypto are not touched unless the ceremony succeeds.
    pub async fn get_with_authentication(
        &self,
        options: &AuthenticationOptions,
        request: GetRequest,
    ) -> Result<Credentials> {
        let gate = self.gate.as_ref().ok_or_else(|| {
            CredentialsError::AuthenticationCapabilityUnavailable(
                "no local authenticator is configured".to_string(),
            )
        })?;

        gate.authenticate(options).await?;
        debug!(slot = %self.keys.blob, "Local authentication succeeded");

        self.get(request).await
    }

    /// Callback flavour of [`get`](Self::get), spawned on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn get_with_callback<F>(self: &Arc<Self>, request: GetRequest, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Credentials>) + Send + 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            callback(manager.get(request).await);
        })
    }

    /// Checks the plaintext mirror only; never decrypts.
    pub async fn has_valid_credentials(&self, min_ttl: u64) -> Result<bool> {
        let _slot = self.slot.lock().await;
        self.has_valid_locked(min_ttl, Utc::now())
    }

    /// Removes the blob and every mirror field. Idempotent.
    pub async fn clear(&self) -> Result<()> {
        let _slot = self.slot.lock().await;
        self.clear_locked()
    }

    fn save_locked(&self, credentials: &Credentials) -> Result<()> {
        if credentials.is_empty() {
            warn!(slot = %self.keys.blob, "Refusing to save credentials without tokens");
            return Err(CredentialsError::InvalidCredentials);
        }

        let json = serde_json::to_vec(credentials).map_err(CredentialsError::Serialization)?;
        let sealed = match self.crypto.encrypt(&json) {
            Ok(sealed) => sealed,
            Err(e @ CryptoError::DeviceIncompatible(_)) => {
                error!(slot = %self.keys.blob, error = %e, "Device cannot encrypt credentials");
                return Err(CredentialsError::DeviceIncompatible(e));
            }
            Err(e @ CryptoError::KeyInvalidated(_)) => {
                warn!(slot = %self.keys.blob, error = %e, "Encryption key invalidated during save");
                self.clear_after_invalidation();
                return Err(CredentialsError::KeyInvalidated {
                    message: KEY_INVALIDATED_ON_SAVE,
                    source: e,
                });
            }
        };

        let expires_at = credentials.expires_at.timestamp_millis();
        self.storage
            .store_all(&[
                (self.keys.blob.as_str(), StoredValue::String(BASE64.encode(sealed))),
                (self.keys.expires_at.as_str(), StoredValue::Long(expires_at)),
                (self.keys.legacy_expires_at.as_str(), StoredValue::Long(expires_at)),
                (self.keys.can_refresh.as_str(), StoredValue::Bool(credentials.can_refresh())),
            ])
            .map_err(CredentialsError::Storage)?;

        debug!(
            slot = %self.keys.blob,
            expires_at = %credentials.expires_at,
            has_refresh_token = credentials.can_refresh(),
            "Credentials saved"
        );
        Ok(())
    }

    async fn get_locked(&self, request: &GetRequest) -> Result<Credentials> {
        let now = Utc::now();

        if !self.has_valid_locked(request.min_ttl, now)? {
            debug!(slot = %self.keys.blob, min_ttl = request.min_ttl, "No valid credentials stored");
            return Err(CredentialsError::NoCredentials);
        }

        let credentials = self.load_locked(now)?;
        if credentials.is_empty() {
            warn!(slot = %self.keys.blob, "Stored record has neither access nor ID token");
            return Err(CredentialsError::NoCredentials);
        }

        let Some(reason) = policy::needs_refresh(
            &credentials,
            request.scope.as_deref(),
            request.min_ttl,
            request.force_refresh,
            now,
        ) else {
            return Ok(credentials);
        };

        let Some(refresh_token) = credentials.refresh_token.clone().filter(|t| !t.is_empty()) else {
            debug!(slot = %self.keys.blob, reason = ?reason, "Refresh needed but no refresh token");
            return Err(CredentialsError::NoCredentials);
        };

        info!(
            slot = %self.keys.blob,
            reason = ?reason,
            min_ttl = request.min_ttl,
            force_refresh = request.force_refresh,
            "Renewing credentials"
        );

        let fresh = self
            .transport
            .renew(RenewRequest {
                refresh_token: refresh_token.clone(),
                scope: request.scope.clone(),
                parameters: request.parameters.clone(),
                headers: request.headers.clone(),
            })
            .await
            .map_err(|e| {
                warn!(slot = %self.keys.blob, error = %e, "Credential renewal failed");
                CredentialsError::RefreshFailed(e)
            })?;

        let now = Utc::now();
        if policy::will_expire(fresh.expires_at, request.min_ttl, now) {
            let remaining = policy::remaining_lifetime(fresh.expires_at, now);
            warn!(
                slot = %self.keys.blob,
                remaining,
                min_ttl = request.min_ttl,
                "Renewed access token does not satisfy min_ttl"
            );
            return Err(CredentialsError::InsufficientTokenLifetime {
                remaining,
                min_ttl: request.min_ttl,
            });
        }

        let merged = merge_renewed(fresh, refresh_token);
        if let Err(e) = self.save_locked(&merged) {
            error!(slot = %self.keys.blob, error = %e, "Failed to store renewed credentials");
            return Err(CredentialsError::save_after_refresh(e, merged));
        }

        if reason == RefreshReason::ScopeChanged {
            debug!(slot = %self.keys.blob, scope = ?merged.scope, "Scope updated by renewal");
        }
        info!(slot = %self.keys.blob, expires_at = %merged.expires_at, "Credentials renewed");
        Ok(merged)
    }

    fn load_locked(&self, now: DateTime<Utc>) -> Result<Credentials> {
        let encoded = self
            .storage
            .retrieve_string(&self.keys.blob)
            .map_err(CredentialsError::Storage)?
            .ok_or(CredentialsError::NoCredentials)?;

        let sealed = BASE64
            .decode(encoded.trim())
            .map_err(CredentialsError::CorruptedBlob)?;

        let plaintext = match self.crypto.decrypt(&sealed) {
            Ok(plaintext) => plaintext,
            Err(e @ CryptoError::DeviceIncompatible(_)) => {
                error!(slot = %self.keys.blob, error = %e, "Device cannot decrypt credentials");
                return Err(CredentialsError::DeviceIncompatible(e));
            }
            Err(e @ CryptoError::KeyInvalidated(_)) => {
                warn!(slot = %self.keys.blob, error = %e, "Encryption key invalidated, discarding credentials");
                self.clear_after_invalidation();
                return Err(CredentialsError::KeyInvalidated {
                    message: KEY_INVALIDATED_ON_GET,
                    source: e,
                });
            }
        };

        let stored: StoredCredentials =
            serde_json::from_slice(&plaintext).map_err(CredentialsError::Serialization)?;
        Ok(stored.into_credentials(now))
    }

    fn has_valid_locked(&self, min_ttl: u64, now: DateTime<Utc>) -> Result<bool> {
        let has_blob = self
            .storage
            .retrieve_string(&self.keys.blob)
            .map_err(CredentialsError::Storage)?
            .is_some_and(|blob| !blob.is_empty());
        let expires_at = self
            .storage
            .retrieve_long(&self.keys.expires_at)
            .map_err(CredentialsError::Storage)?;
        let can_refresh = self
            .storage
            .retrieve_bool(&self.keys.can_refresh)
            .map_err(CredentialsError::Storage)?
            .unwrap_or(false);

        Ok(policy::is_valid(has_blob, expires_at, min_ttl, can_refresh, now))
    }

    fn clear_locked(&self) -> Result<()> {
        self.storage
            .remove_all(&self.keys.all())
            .map_err(CredentialsError::Storage)?;
        debug!(slot = %self.keys.blob, "Credentials cleared");
        Ok(())
    }

    /// A failed clear is logged; the invalidation error still reaches the caller.
    fn clear_after_invalidation(&self) {
        if let Err(e) = self.clear_locked() {
            error!(slot = %self.keys.blob, error = %e, "Failed to clear credentials after key invalidation");
        }
    }
}

/// Takes everything from the renewed record, keeping the previous refresh
/// token when the server did not rotate it.
fn merge_renewed(fresh: Credentials, previous_refresh_token: String) -> Credentials {
    let refresh_token = fresh
        .refresh_token
        .filter(|t| !t.is_empty())
        .unwrap_or(previous_refresh_token);

    Credentials {
        refresh_token: Some(refresh_token),
        ..fresh
    }
}
