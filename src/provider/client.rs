//! OIDC provider client: authorization URL, code exchange, ID token verification.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Reject any algorithm outside RS256/384/512, PS256/384/512, ES256/384,
//!    and any the discovery document does not advertise.
//! 3. Look the signing key up in the provider's JWKS (cached; refreshed once
//!    on an unknown `kid`).
//! 4. Verify signature, `iss`, `aud` (must contain the client id) and `exp`
//!    with the configured clock leeway.
//! 5. Return the full claim set.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, TokenData, Validation};
use oidc_login_core::Claims;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{IdentityProvider, JwksCache, OOB_REDIRECT_URI, ProviderConfig, ProviderMetadata, SCOPES};
use crate::config::ProviderSettings;
use crate::{Error, Result};

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// Token endpoint error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// A discovered OIDC provider.
///
/// Owns the HTTP client and JWKS cache used for discovery, so later signing
/// key refreshes go through the same context.
pub struct OidcProvider {
    config: ProviderConfig,
    metadata: ProviderMetadata,
    http: reqwest::Client,
    jwks: JwksCache,
    leeway: Duration,
}

impl OidcProvider {
    /// Discover the issuer and build a provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the issuer metadata is unreachable or
    /// invalid.
    pub async fn connect(config: ProviderConfig, settings: &ProviderSettings) -> Result<Self> {
        if !config.issuer.starts_with("https://") {
            warn!(issuer = %config.issuer, "OIDC issuer is not HTTPS");
        }

        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        let metadata = ProviderMetadata::discover(&http, &config.issuer).await?;
        let jwks = JwksCache::new(http.clone(), settings.jwks_cache_ttl);

        Ok(Self {
            config,
            metadata,
            http,
            jwks,
            leeway: settings.clock_leeway,
        })
    }

    /// Discovered provider metadata
    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<String> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Exchange(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {description}", err.error),
                    None => err.error,
                },
                Err(_) => format!("HTTP {status}"),
            };
            return Err(Error::Exchange(reason));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Exchange(format!("failed to parse token response: {e}")))?;

        token
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or(Error::TokenMissing)
    }

    async fn verify(&self, id_token: &str) -> Result<Claims> {
        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| Error::Verification(format!("malformed ID token: {e}")))?;
        let alg = allowed_algorithm(
            header.alg,
            &self.metadata.id_token_signing_alg_values_supported,
        )?;

        let key = self
            .jwks
            .find_decoding_key(&self.metadata.jwks_uri, header.kid.as_deref())
            .await?;

        let validation = build_validation(alg, &self.metadata.issuer, &self.config.client_id, self.leeway);
        let data: TokenData<Claims> = jsonwebtoken::decode(id_token, &key, &validation)
            .map_err(|e| Error::Verification(e.to_string()))?;

        debug!(claims = data.claims.len(), "ID token verified");
        Ok(data.claims)
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn auth_url(&self, state: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint)
            .map_err(|e| Error::Internal(format!("invalid authorization endpoint: {e}")))?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", OOB_REDIRECT_URI);
            params.append_pair("response_type", "code");
            params.append_pair("scope", &SCOPES.join(" "));
            if let Some(state) = state {
                params.append_pair("state", state);
            }
        }
        Ok(url)
    }

    async fn validate_code(&self, code: &str, redirect_uri: Option<&str>) -> Result<Claims> {
        let redirect_uri = redirect_uri.filter(|r| !r.is_empty()).unwrap_or(OOB_REDIRECT_URI);
        let id_token = self.exchange(code, redirect_uri).await?;
        self.verify(&id_token).await
    }
}

fn allowed_algorithm(alg: Algorithm, advertised: &[String]) -> Result<Algorithm> {
    let alg = match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512
        | Algorithm::ES256
        | Algorithm::ES384 => alg,
        other => {
            return Err(Error::Verification(format!(
                "unsupported ID token algorithm {other:?}"
            )));
        }
    };

    if !advertised.is_empty()
        && !advertised
            .iter()
            .any(|name| name.parse::<Algorithm>().is_ok_and(|a| a == alg))
    {
        return Err(Error::Verification(format!(
            "ID token algorithm {alg:?} is not advertised by the provider"
        )));
    }
    Ok(alg)
}

fn build_validation(alg: Algorithm, issuer: &str, client_id: &str, leeway: Duration) -> Validation {
    let mut v = Validation::new(alg);
    v.leeway = leeway.as_secs();
    v.set_issuer(&[issuer]);
    v.set_audience(&[client_id]);
    v.set_required_spec_claims(&["exp", "iss", "aud"]);
    v
}
