//! Credential issuance for successful logins.
//!
//! Lease bookkeeping and revocation happen downstream; this module only mints
//! the opaque bearer token and shapes the `auth` response block.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use oidc_login_core::{Alias, LoginOutcome};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix of every issued client token.
pub const TOKEN_PREFIX: &str = "olt_";

/// A credential issued for one successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCredential {
    /// Opaque bearer token (`olt_` + 256 random bits).
    pub client_token: String,
    /// Non-secret handle for the token, safe to log.
    pub accessor: String,
    /// Granted policies.
    pub policies: Vec<String>,
    /// Use limit (0 = unlimited).
    pub num_uses: u32,
    /// Lease duration in seconds.
    pub lease_duration: u64,
    /// Max lease duration in seconds.
    pub max_lease_duration: u64,
    /// Display name.
    pub display_name: String,
    /// Identity alias.
    pub alias: Alias,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
}

impl IssuedCredential {
    /// Mint a credential for an authorized login.
    #[must_use]
    pub fn issue(outcome: &LoginOutcome) -> Self {
        Self {
            client_token: generate_token(),
            accessor: uuid::Uuid::new_v4().to_string(),
            policies: outcome.policies.clone(),
            num_uses: outcome.num_uses,
            lease_duration: outcome.ttl.as_secs(),
            max_lease_duration: outcome.max_ttl.as_secs(),
            display_name: outcome.display_name.clone(),
            alias: outcome.alias.clone(),
            issued_at: Utc::now(),
        }
    }
}

fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(random_bytes))
}
