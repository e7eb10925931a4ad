//! Refresh transport: exchanges a refresh token for a new credential set.
//!
//! The manager drives refreshes through [`RefreshTransport`] and never builds
//! requests itself. [`HttpRefreshTransport`] implements the standard OAuth 2.0
//! `refresh_token` grant against a token endpoint.

mod http;

pub use http::HttpRefreshTransport;

use crate::credentials::Credentials;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Everything a transport needs for one refresh call.
#[derive(Clone, Default)]
pub struct RenewRequest {
    pub refresh_token: String,

    /// Replaces the granted scope when present
    pub scope: Option<String>,

    /// Extra form parameters sent with the grant
    pub parameters: HashMap<String, String>,

    /// Extra HTTP headers sent with the grant
    pub headers: HashMap<String, String>,
}

impl std::fmt::Debug for RenewRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewRequest")
            .field("scope", &self.scope)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Transport or protocol failure while refreshing.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced an HTTP response
    #[error("refresh request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The authorization server answered with an error status
    #[error("refresh rejected with status {status}: {error}")]
    Rejected {
        status: u16,
        error: String,
        description: Option<String>,
    },

    /// The response body could not be understood
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// True when the server refused the refresh token itself.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, TransportError::Rejected { error, .. } if error == "invalid_grant")
    }
}

/// Exchanges a refresh token for new credentials.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    /// Performs one refresh call.
    ///
    /// The returned record's `refresh_token` may be `None` or empty when the
    /// server does not rotate refresh tokens; the manager keeps the previous
    /// one in that case.
    async fn renew(&self, request: RenewRequest) -> Result<Credentials, TransportError>;
}
