//! Local authentication gate (biometric / device unlock).
//!
//! The gate runs a single authentication ceremony before credentials are
//! released. The platform side is injected through [`LocalAuthenticator`], and
//! its availability is an explicit capability check, not a runtime probe.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};


/// Which authenticators may satisfy the ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Authenticators {
    /// Class 3 biometrics
    #[default]
    Strong,
    /// Class 2 biometrics
    Weak,
    /// PIN, pattern or password
    DeviceCredential,
    /// Strong biometrics with device credential fallback
    StrongOrDeviceCredential,
}

impl Authenticators {
    pub fn allows_device_credential(self) -> bool {
        matches!(
            self,
            Authenticators::DeviceCredential | Authenticators::StrongOrDeviceCredential
        )
    }
}

/// Prompt configuration for one ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationOptions {
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    /// Label of the cancel button. Absent when a device credential is allowed,
    /// since the platform then supplies its own fallback button.
    pub negative_button_text: Option<String>,
    pub authenticators: Authenticators,
}

impl AuthenticationOptions {
    pub fn builder(title: impl Into<String>) -> AuthenticationOptionsBuilder {
        AuthenticationOptionsBuilder {
            title: title.into(),
            subtitle: None,
            description: None,
            negative_button_text: None,
            authenticators: Authenticators::default(),
        }
    }
}

/// Builder for [`AuthenticationOptions`].
#[derive(Debug, Clone)]
pub struct AuthenticationOptionsBuilder {
    title: String,
    subtitle: Option<String>,
    description: Option<String>,
    negative_button_text: Option<String>,
    authenticators: Authenticators,
}

impl AuthenticationOptionsBuilder {
    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn negative_button_text(mut self, text: impl Into<String>) -> Self {
        self.negative_button_text = Some(text.into());
        self
    }

    pub fn authenticators(mut self, authenticators: Authenticators) -> Self {
        self.authenticators = authenticators;
        self
    }

    /// Fails when the title is blank.
    pub fn build(self) -> Result<AuthenticationOptions, AuthenticationError> {
        if self.title.trim().is_empty() {
            return Err(AuthenticationError::InvalidOptions(
                "title must not be empty".to_string(),
            ));
        }

        let negative_button_text = if self.authenticators.allows_device_credential() {
            None
        } else {
            Some(self.negative_button_text.unwrap_or_else(|| "Cancel".to_string()))
        };

        Ok(AuthenticationOptions {
            title: self.title,
            subtitle: self.subtitle,
            description: self.description,
            negative_button_text,
            authenticators: self.authenticators,
        })
    }
}

/// Local authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    /// The platform cannot run a ceremony with the requested authenticators
    #[error("local authentication is not available: {0}")]
    CapabilityUnavailable(String),

    /// The user dismissed the prompt
    #[error("local authentication was cancelled")]
    Cancelled,

    /// Too many failed attempts
    #[error("local authentication is locked out")]
    Lockout,

    /// The ceremony ran and did not succeed
    #[error("local authentication failed ({code}): {message}")]
    Failed { code: i32, message: String },

    #[error("invalid authentication options: {0}")]
    InvalidOptions(String),
}

/// Platform authenticator contract.
#[async_trait]
pub trait LocalAuthenticator: Send + Sync {
    /// Whether a ceremony with `authenticators` can run on this platform.
    fn is_available(&self, authenticators: Authenticators) -> bool;

    /// Runs one ceremony. Single attempt per call.
    async fn authenticate(&self, options: &AuthenticationOptions) -> Result<(), AuthenticationError>;
}

/// Wraps an authenticator with the capability check.
#[derive(Clone)]
pub struct AuthenticationGate {
    authenticator: Arc<dyn LocalAuthenticator>,
}

impl AuthenticationGate {
    pub fn new(authenticator: Arc<dyn LocalAuthenticator>) -> Self {
        Self { authenticator }
    }

    /// Fails fast when the capability is missing, otherwise runs the ceremony.
    pub async fn authenticate(&self, options: &AuthenticationOptions) -> Result<(), AuthenticationError> {
        if !self.authenticator.is_available(options.authenticators) {
            warn!(authenticators = ?options.authenticators, "Local authentication unavailable");
            return Err(AuthenticationError::CapabilityUnavailable(format!(
                "{:?} authenticators are not available on this device",
                options.authenticators
            )));
        }

        debug!(authenticators = ?options.authenticators, "Starting local authentication");
        self.authenticator.authenticate(options).await.inspect_err(|e| {
            warn!(error = %e, "Local authentication did not succeed");
        })
    }
}
