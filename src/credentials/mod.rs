//! Credential record and the building blocks of the encrypted cache.
//!
//! This module provides the [`Credentials`] record together with the pieces the
//! [`CredentialsManager`](crate::manager::CredentialsManager) composes:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialsManager                 │
//! │  - serialized save / get / clear         │
//! │  - validity policy, refresh, merge       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CryptoBoundary                     │
//! │  - AES-256-GCM (AesGcmCrypto)            │
//! │  - DeviceIncompatible / KeyInvalidated   │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Storage                            │
//! │  - base64 blob + plaintext expiry mirror │
//! │  - SQLite or in-memory                   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - The whole record is encrypted as one blob; only the expiry instant and the
//!   "can refresh" flag are kept in plaintext so validity can be checked without
//!   touching the key.
//! - `Debug` output never includes token material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod encryption;
pub mod policy;
pub mod storage;

pub use encryption::{validate_key, AesGcmCrypto, CryptoBoundary, CryptoError};
pub use storage::{MemoryStorage, SqliteStorage, Storage, StoredValue};

/// An OAuth/OIDC credential set for one authenticated session.
///
/// At least one of `access_token` and `id_token` must be non-empty for the
/// record to be accepted by the manager.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// OIDC ID token (may be empty for pure OAuth flows)
    pub id_token: String,

    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// Token type, usually "Bearer"
    pub token_type: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,

    /// Space separated scope granted with the access token
    pub scope: Option<String>,
}

impl Credentials {
    pub fn new(
        id_token: impl Into<String>,
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        scope: Option<String>,
    ) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: access_token.into(),
            token_type: token_type.into(),
            refresh_token,
            expires_at,
            scope,
        }
    }

    /// True when neither an access token nor an ID token is present.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty() && self.id_token.is_empty()
    }

    /// True when a non-empty refresh token is present.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("has_id_token", &!self.id_token.is_empty())
            .field("has_access_token", &!self.access_token.is_empty())
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.can_refresh())
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Wire shape of the decrypted blob.
///
/// Older writers could omit the tokens, the token type or the expiry. Every
/// field is optional here and [`StoredCredentials::into_credentials`] fills the
/// gaps, so the rest of the crate only ever sees a complete [`Credentials`].
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StoredCredentials {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    scope: Option<String>,
}

impl StoredCredentials {
    /// Missing tokens become empty strings and a missing expiry becomes `now`.
    pub(crate) fn into_credentials(self, now: DateTime<Utc>) -> Credentials {
        Credentials {
            id_token: self.id_token.unwrap_or_default(),
            access_token: self.access_token.unwrap_or_default(),
            token_type: self.token_type.unwrap_or_default(),
            refresh_token: self.refresh_token,
            expires_at: self.expires_at.unwrap_or(now),
            scope: self.scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample() -> Credentials {
        Credentials::new(
            "id-token",
            "access-token",
            "Bearer",
            Some("refresh-token".to_string()),
            Utc.timestamp_millis_opt(1_900_000_000_123).unwrap(),
            Some("openid profile".to_string()),
        )
    }

    #[test]
    fn test_blob_keeps_millisecond_expiry() {
        let creds = sample();
        let json = serde_json::to_string(&creds).unwrap();
        assert!(json.contains("\"expires_at\":1900000000123"));

        let decoded: StoredCredentials = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.into_credentials(Utc::now()), creds);
    }

    #[test]
    fn test_legacy_blob_without_tokens() {
        let now = Utc::now();
        let json = r#"{"refresh_token": "rt", "scope": "openid"}"#;

        let decoded: StoredCredentials = serde_json::from_str(json).unwrap();
        let creds = decoded.into_credentials(now);

        assert_eq!(creds.access_token, "");
        assert_eq!(creds.id_token, "");
        assert_eq!(creds.token_type, "");
        assert_eq!(creds.expires_at, now);
        assert!(creds.is_empty());
        assert!(creds.can_refresh());
    }

    #[test]
    fn test_empty_refresh_token_cannot_refresh() {
        let mut creds = sample();
        creds.refresh_token = Some(String::new());
        assert!(!creds.can_refresh());

        creds.refresh_token = None;
        assert!(!creds.can_refresh());
    }

    #[test]
    fn test_debug_hides_tokens() {
        let mut creds = sample();
        creds.expires_at = Utc::now() + Duration::hours(1);
        let rendered = format!("{:?}", creds);

        assert!(!rendered.contains("access-token"));
        assert!(!rendered.contains("refresh-token"));
        assert!(!rendered.contains("id-token"));
        assert!(rendered.contains("has_access_token: true"));
    }
}
