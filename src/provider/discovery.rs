//! OpenID Provider Metadata discovery
//!
//! Fetches `<issuer>/.well-known/openid-configuration` (OpenID Connect
//! Discovery 1.0, section 4).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// OpenID Provider Metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must equal the configured issuer
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// JWK Set document URL
    pub jwks_uri: String,

    /// ID token signing algorithms the provider advertises; empty when the
    /// document omits them
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Discover provider metadata for `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the document is unreachable, malformed,
    /// names a different issuer, or carries unparseable endpoint URLs.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self> {
        let url = well_known_url(issuer);
        debug!(url = %url, "Discovering OpenID provider metadata");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("failed to fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Discovery(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| Error::Discovery(format!("failed to parse provider metadata: {e}")))?;

        metadata.check(issuer)?;
        debug!(issuer = %metadata.issuer, "Discovered OpenID provider");
        Ok(metadata)
    }

    fn check(&self, expected_issuer: &str) -> Result<()> {
        if self.issuer.trim_end_matches('/') != expected_issuer.trim_end_matches('/') {
            return Err(Error::Discovery(format!(
                "issuer did not match the issuer returned by provider, expected {expected_issuer:?} got {:?}",
                self.issuer
            )));
        }
        for (name, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("jwks_uri", &self.jwks_uri),
        ] {
            Url::parse(value)
                .map_err(|e| Error::Discovery(format!("invalid {name} {value:?}: {e}")))?;
        }
        Ok(())
    }
}

fn well_known_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}
