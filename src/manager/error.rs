//! Error taxonomy for credential manager operations.

use crate::auth::AuthenticationError;
use crate::credentials::{CryptoError, Credentials};
use crate::refresh::TransportError;
use thiserror::Error;

pub type Result<T, E = CredentialsError> = std::result::Result<T, E>;

/// Errors returned by [`CredentialsManager`](super::CredentialsManager).
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// Both `access_token` and `id_token` were empty on save
    #[error("credentials must have a valid access_token or id_token value")]
    InvalidCredentials,

    /// Nothing usable is stored, or the stored record cannot be refreshed
    #[error("no credentials were previously set")]
    NoCredentials,

    /// The crypto boundary is permanently unusable on this device
    #[error("this device is not compatible with the credentials manager")]
    DeviceIncompatible(#[source] CryptoError),

    /// The key was invalidated; the slot has already been cleared
    #[error("{message}")]
    KeyInvalidated {
        message: &'static str,
        #[source]
        source: CryptoError,
    },

    /// The refresh transport failed; stored credentials are untouched
    #[error("an error occurred while trying to use the refresh token to renew the credentials")]
    RefreshFailed(#[source] TransportError),

    /// The renewed access token still expires within the requested minimum
    #[error(
        "the lifetime of the renewed access token ({remaining}s) is less than the min_ttl requested ({min_ttl}s); \
         increase the access token lifetime on the authorization server or request a lower min_ttl"
    )]
    InsufficientTokenLifetime { remaining: i64, min_ttl: u64 },

    /// The refresh succeeded but the new credentials could not be stored
    #[error("renewed credentials could not be stored: {source}")]
    SaveAfterRefreshFailed {
        /// Present when the save failed in the crypto boundary, so the caller
        /// can still use the renewed tokens for this session.
        refreshed: Option<Box<Credentials>>,
        #[source]
        source: Box<CredentialsError>,
    },

    /// The local authentication ceremony did not succeed
    #[error("local authentication failed")]
    AuthenticationFailed(#[source] AuthenticationError),

    /// No usable local authenticator on this platform
    #[error("local authentication is unavailable: {0}")]
    AuthenticationCapabilityUnavailable(String),

    /// The persistence adapter failed
    #[error("credential storage failed")]
    Storage(#[source] anyhow::Error),

    /// The decrypted record could not be encoded or decoded
    #[error("credentials could not be serialized")]
    Serialization(#[source] serde_json::Error),

    /// The stored blob is not valid base64
    #[error("stored credentials are corrupted")]
    CorruptedBlob(#[source] base64::DecodeError),
}

pub(crate) const KEY_INVALIDATED_ON_SAVE: &str =
    "a change in the device security settings invalidated the encryption key; \
     the stored credentials were cleared, please try saving the credentials again";

pub(crate) const KEY_INVALIDATED_ON_GET: &str =
    "a change in the device security settings invalidated the encryption key; \
     any previously stored content is now lost, please try saving the credentials again";

impl CredentialsError {
    /// Renewed credentials that were obtained but could not be persisted.
    pub fn refreshed_credentials(&self) -> Option<&Credentials> {
        match self {
            CredentialsError::SaveAfterRefreshFailed { refreshed, .. } => refreshed.as_deref(),
            _ => None,
        }
    }

    /// True when repeating the operation may succeed without user interaction.
    pub fn is_retryable(&self) -> bool {
        match self {
            CredentialsError::KeyInvalidated { .. } | CredentialsError::Storage(_) => true,
            CredentialsError::RefreshFailed(e) => !e.is_invalid_grant(),
            _ => false,
        }
    }

    /// Wraps a failed save that followed a successful refresh.
    pub(crate) fn save_after_refresh(source: CredentialsError, refreshed: Credentials) -> Self {
        let refreshed = match source {
            CredentialsError::DeviceIncompatible(_) | CredentialsError::KeyInvalidated { .. } => {
                Some(Box::new(refreshed))
            }
            _ => None,
        };
        CredentialsError::SaveAfterRefreshFailed {
            refreshed,
            source: Box::new(source),
        }
    }
}

impl From<AuthenticationError> for CredentialsError {
    fn from(error: AuthenticationError) -> Self {
        match error {
            AuthenticationError::CapabilityUnavailable(reason) => {
                CredentialsError::AuthenticationCapabilityUnavailable(reason)
            }
            other => CredentialsError::AuthenticationFailed(other),
        }
    }
}
