// Credential record, crypto boundary, persistence and validity policy
pub mod credentials;

// Serialized credential lifecycle (save / get / refresh / clear)
pub mod manager;

// Refresh transport (OAuth refresh_token grant)
pub mod refresh;

// Local authentication gate
pub mod auth;

// TOML + environment configuration
pub mod config;

pub use credentials::Credentials;
pub use manager::{
    BlockingCredentialsManager, CredentialsError, CredentialsManager, GetRequest, DEFAULT_SLOT,
};
