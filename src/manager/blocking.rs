//! Blocking facade over [`CredentialsManager`].
//!
//! For callers without an async runtime. Calls go through the same slot lock
//! as the async API, so blocking and async callers can share one manager.

use super::{CredentialsManager, GetRequest, Result};
use crate::auth::AuthenticationOptions;
use crate::credentials::Credentials;
use anyhow::Context;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Synchronous handle to a [`CredentialsManager`].
///
/// Must not be used from inside an async context: `block_on` panics there.
pub struct BlockingCredentialsManager {
    manager: Arc<CredentialsManager>,
    runtime: Runtime,
}

impl BlockingCredentialsManager {
    /// Wraps `manager` with a private current-thread runtime.
    pub fn new(manager: Arc<CredentialsManager>) -> anyhow::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build blocking runtime")?;
        Ok(Self { manager, runtime })
    }

    /// The shared async manager.
    pub fn manager(&self) -> &Arc<CredentialsManager> {
        &self.manager
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        self.runtime.block_on(self.manager.save(credentials))
    }

    pub fn get(&self, request: GetRequest) -> Result<Credentials> {
        self.runtime.block_on(self.manager.get(request))
    }

    pub fn get_with_authentication(
        &self,
        options: &AuthenticationOptions,
        request: GetRequest,
    ) -> Result<Credentials> {
        self.runtime
            .block_on(self.manager.get_with_authentication(options, request))
    }

    pub fn has_valid_credentials(&self, min_ttl: u64) -> Result<bool> {
        self.runtime.block_on(self.manager.has_valid_credentials(min_ttl))
    }

    pub fn clear(&self) -> Result<()> {
        self.runtime.block_on(self.manager.clear())
    }
}
