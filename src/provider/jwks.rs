//! Signing key cache for ID token verification.
//!
//! - A fetched JWKS is reused until its TTL elapses (default 1 hour).
//! - An unknown `kid` triggers a single forced refresh before failing, which
//!   picks up provider key rotation without re-fetching on every bad token.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet, PublicKeyUse},
};
use tracing::debug;

use crate::{Error, Result};

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// JWKS cache, one entry per `jwks_uri`.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create a cache that fetches through `http`.
    #[must_use]
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http,
            ttl,
        }
    }

    /// Return the cached JWKS for `jwks_uri`, fetching it if absent or stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(&self, jwks_uri: &str, force_refresh: bool) -> Result<JwkSet> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_uri) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(jwks_uri = %jwks_uri, force_refresh, "Fetching JWKS");
        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| Error::Verification(format!("failed to fetch signing keys: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Verification(format!(
                "failed to fetch signing keys: HTTP {}",
                response.status()
            )));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| Error::Verification(format!("invalid JWKS document: {e}")))?;

        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );

        Ok(jwks)
    }

    /// Find the decoding key for `kid`, refreshing once if it is not cached.
    ///
    /// Without a `kid`, the set must contain exactly one usable signing key.
    pub async fn find_decoding_key(&self, jwks_uri: &str, kid: Option<&str>) -> Result<DecodingKey> {
        let jwks = self.get_or_fetch(jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = ?kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.get_or_fetch(jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| match kid {
            Some(kid) => Error::Verification(format!("unknown signing key id {kid:?}")),
            None => Error::Verification(
                "token has no key id and the provider publishes several keys".to_string(),
            ),
        })
    }
}

/// Find a signing JWK by `kid` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: Option<&str>) -> Option<DecodingKey> {
    let mut usable = jwks.keys.iter().filter(|jwk| is_signing_key(jwk));

    let jwk = match kid {
        Some(kid) => usable.find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?,
        None => {
            let first = usable.next()?;
            if usable.next().is_some() {
                return None;
            }
            first
        }
    };

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y).ok(),
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

fn is_signing_key(jwk: &Jwk) -> bool {
    let asymmetric = matches!(
        jwk.algorithm,
        AlgorithmParameters::RSA(_) | AlgorithmParameters::EllipticCurve(_)
    );
    let for_signing = !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption));
    asymmetric && for_signing
}
