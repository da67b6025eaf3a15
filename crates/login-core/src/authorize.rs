//! The role authorizer: verified claims + role -> login outcome.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::claims::Claims;
use crate::role::Role;
use crate::{Error, Result};

/// Identity alias attached to an issued credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Value of the role's user claim
    pub name: String,
    /// Optional `email` / `given_name` copied from the claims
    pub metadata: BTreeMap<String, String>,
}

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Policies granted by the role
    pub policies: Vec<String>,
    /// Credential use limit (0 = unlimited)
    pub num_uses: u32,
    /// Credential TTL (0 = mount default)
    pub ttl: Duration,
    /// Credential max TTL (0 = mount default)
    pub max_ttl: Duration,
    /// Display name (same as the alias name)
    pub display_name: String,
    /// Identity alias
    pub alias: Alias,
}

/// Decide whether `claims` satisfy `role`.
///
/// `role` is `None` when no role is stored under `role_name`. Bound claims are
/// checked fail-closed: a missing claim is a mismatch.
///
/// # Errors
///
/// - [`Error::InvalidRequest`] if `role_name` is empty
/// - [`Error::RoleNotFound`] if `role` is `None`
/// - [`Error::MissingUserClaim`] if the user claim is absent or not a string
/// - [`Error::BoundClaimMismatch`] if any bound claim is absent or differs
pub fn authorize(claims: &Claims, role_name: &str, role: Option<&Role>) -> Result<LoginOutcome> {
    if role_name.is_empty() {
        return Err(Error::InvalidRequest("role is required".to_string()));
    }
    let role = role.ok_or_else(|| Error::RoleNotFound(role_name.to_string()))?;

    let user = claims
        .get_str(&role.user_claim)
        .ok_or_else(|| Error::MissingUserClaim(role.user_claim.clone()))?;

    for (name, expected) in &role.bound_claims {
        let ok = claims.get(name).is_some_and(|actual| actual.matches(expected));
        if !ok {
            debug!(role = %role_name, claim = %name, "bound claim mismatch");
            return Err(Error::BoundClaimMismatch(name.clone()));
        }
    }

    let mut metadata = BTreeMap::new();
    for (key, claim) in [
        ("given_name", &role.given_name_claim),
        ("email", &role.email_claim),
    ] {
        if claim.is_empty() {
            continue;
        }
        if let Some(value) = claims.get_str(claim) {
            metadata.insert(key.to_string(), value.to_string());
        }
    }

    Ok(LoginOutcome {
        policies: role.policies.clone(),
        num_uses: role.num_uses,
        ttl: role.ttl,
        max_ttl: role.max_ttl,
        display_name: user.to_string(),
        alias: Alias {
            name: user.to_string(),
            metadata,
        },
    })
}
