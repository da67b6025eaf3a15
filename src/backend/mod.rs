//! The authentication endpoint set.
//!
//! [`AuthBackend`] composes the role store, the provider configuration and a
//! cached [`IdentityProvider`]:
//!
//! - `auth_url` returns the provider's authorization URL (no state)
//! - `login` resolves the role, exchanges the code for verified claims,
//!   authorizes them against the role and issues a credential
//!
//! # Provider cache
//!
//! The provider is built by discovery, so it is cached behind a single
//! reader/writer lock. Reads clone the cached `Arc`; a miss after restart
//! builds the provider lazily under the write lock. A configuration write
//! holds the write lock throughout: it validates and builds the new provider
//! first, clears the cache, persists, and only then installs the new provider.
//! A failed write therefore leaves the backend "not configured" in memory
//! rather than serving a provider that disagrees with storage.

pub mod handler;
pub mod provider_config;
pub mod roles;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use oidc_login_core::authorize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::audit::{self, AuditEvent};
use crate::credential::IssuedCredential;
use crate::provider::{IdentityProvider, ProviderConfig, ProviderFactory};
use crate::{Error, Result};

pub use handler::{EndpointState, endpoint_routes, router};
pub use roles::{RoleStore, RoleWrite};
pub use storage::{FileStorage, InMemoryStorage, Storage};

/// The server-side authentication engine
pub struct AuthBackend {
    storage: Arc<dyn Storage>,
    roles: RoleStore,
    factory: Arc<dyn ProviderFactory>,
    provider: RwLock<Option<Arc<dyn IdentityProvider>>>,
}

impl AuthBackend {
    /// Create a backend; no provider is built until first use
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        factory: Arc<dyn ProviderFactory>,
        max_lease_ttl: Duration,
    ) -> Self {
        Self {
            roles: RoleStore::new(Arc::clone(&storage), max_lease_ttl),
            storage,
            factory,
            provider: RwLock::new(None),
        }
    }

    /// Role CRUD
    #[must_use]
    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    /// Authorization URL with the out-of-band redirect
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if no configuration was ever saved.
    pub async fn auth_url(&self) -> Result<Url> {
        let provider = self.identity_provider().await?;
        provider.auth_url(None)
    }

    /// Stored provider configuration
    pub async fn read_config(&self) -> Result<Option<ProviderConfig>> {
        let _guard = self.provider.read().await;
        provider_config::load(self.storage.as_ref()).await
    }

    /// Validate, build and persist a new provider configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an incomplete configuration,
    /// [`Error::Discovery`] if the issuer cannot be discovered, or a storage
    /// error if persisting fails.
    pub async fn write_config(&self, config: ProviderConfig) -> Result<()> {
        let mut cached = self.provider.write().await;

        config.validate()?;
        let provider = self.factory.build(&config).await?;

        *cached = None;
        provider_config::save(self.storage.as_ref(), &config).await?;
        *cached = Some(provider);

        info!(issuer = %config.issuer, "Provider configuration updated");
        audit::emit(&AuditEvent::config_written(&config.issuer));
        Ok(())
    }

    /// Exchange `code` for claims, authorize them against `role_name` and
    /// issue a credential
    ///
    /// `redirect_uri` must be the URI used in the authorization request;
    /// `None` or empty falls back to the out-of-band default.
    ///
    /// The role is resolved before any network call, so an empty or unknown
    /// role never reaches the provider.
    pub async fn login(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        role_name: &str,
    ) -> Result<IssuedCredential> {
        let role_name = roles::normalize_name(role_name);
        match self.try_login(code, redirect_uri, &role_name).await {
            Ok(credential) => {
                info!(role = %role_name, alias = %credential.alias.name, "Login succeeded");
                audit::emit(&AuditEvent::login_succeeded(&role_name, &credential));
                Ok(credential)
            }
            Err(e) => {
                warn!(role = %role_name, error = %e, "Login denied");
                audit::emit(&AuditEvent::login_denied(&role_name, e.to_string()));
                Err(e)
            }
        }
    }

    async fn try_login(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        role_name: &str,
    ) -> Result<IssuedCredential> {
        if role_name.is_empty() {
            return Err(Error::InvalidRequest("role is required".to_string()));
        }
        let role = self
            .roles
            .get(role_name)
            .await?
            .ok_or_else(|| Error::RoleNotFound(role_name.to_string()))?;
        if code.is_empty() {
            return Err(Error::InvalidRequest("code is required".to_string()));
        }

        let provider = self.identity_provider().await?;
        let claims = provider.validate_code(code, redirect_uri).await?;
        let outcome = authorize(&claims, role_name, Some(&role))?;

        Ok(IssuedCredential::issue(&outcome))
    }

    async fn identity_provider(&self) -> Result<Arc<dyn IdentityProvider>> {
        if let Some(provider) = self.provider.read().await.as_ref() {
            return Ok(Arc::clone(provider));
        }

        let mut cached = self.provider.write().await;
        if let Some(provider) = cached.as_ref() {
            return Ok(Arc::clone(provider));
        }

        let config = provider_config::load(self.storage.as_ref())
            .await?
            .ok_or(Error::NotConfigured)?;
        debug!(issuer = %config.issuer, "Building identity provider from stored configuration");
        let provider = self.factory.build(&config).await?;
        *cached = Some(Arc::clone(&provider));
        Ok(provider)
    }
}
