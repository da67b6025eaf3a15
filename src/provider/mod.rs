//! Identity provider client.
//!
//! [`IdentityProvider`] is the seam between the endpoint set and the OIDC
//! provider: authorization URL construction and code-for-claims exchange.
//! [`OidcProvider`] is the real implementation built by discovery;
//! tests install stubs through [`ProviderFactory`].

mod client;
pub mod discovery;
pub mod jwks;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use oidc_login_core::Claims;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ProviderSettings;
use crate::{Error, Result};

pub use client::OidcProvider;
pub use discovery::ProviderMetadata;
pub use jwks::JwksCache;

/// Redirect URI used when the caller does not supply one (manual copy flow).
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Scopes requested in every authorization URL.
pub const SCOPES: &[&str] = &["openid", "email"];

/// Provider configuration written by the administrator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OIDC issuer identifier
    pub issuer: String,
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl ProviderConfig {
    /// Check that every field is present and the issuer is a URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] otherwise.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.is_empty() || self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(Error::InvalidRequest(
                "issuer, client_secret, and client_id are required".to_string(),
            ));
        }
        Url::parse(&self.issuer)
            .map_err(|e| Error::InvalidRequest(format!("issuer is not a valid URL: {e}")))?;
        Ok(())
    }
}

/// An OIDC provider as seen by the endpoint set.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Configuration this provider was built from
    fn config(&self) -> &ProviderConfig;

    /// Authorization URL with the out-of-band redirect and an optional `state`.
    ///
    /// Pure construction from discovered metadata; no network call.
    fn auth_url(&self, state: Option<&str>) -> Result<Url>;

    /// Exchange an authorization code and return the verified ID token claims.
    ///
    /// `redirect_uri` must be the URI used in the authorization request;
    /// `None` or an empty string means [`OOB_REDIRECT_URI`].
    async fn validate_code(&self, code: &str, redirect_uri: Option<&str>) -> Result<Claims>;
}

/// Builds providers from configuration (discovery happens here).
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Build a provider for `config`
    async fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn IdentityProvider>>;
}

/// Factory for [`OidcProvider`]
#[derive(Debug, Clone, Default)]
pub struct OidcProviderFactory {
    settings: ProviderSettings,
}

impl OidcProviderFactory {
    /// Create a factory using `settings` for every provider it builds
    #[must_use]
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ProviderFactory for OidcProviderFactory {
    async fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn IdentityProvider>> {
        let provider = OidcProvider::connect(config.clone(), &self.settings).await?;
        Ok(Arc::new(provider))
    }
}
