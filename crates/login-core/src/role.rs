//! Roles: named authorization policies bound to identity claims.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::claims::ClaimValue;
use crate::{Error, Result};

/// Claim used as the alias name unless a role says otherwise.
pub const DEFAULT_USER_CLAIM: &str = "sub";
/// Claim copied into alias metadata as `email`.
pub const DEFAULT_EMAIL_CLAIM: &str = "email";
/// Claim copied into alias metadata as `given_name`.
pub const DEFAULT_GIVEN_NAME_CLAIM: &str = "given_name";

/// A stored role.
///
/// The role name is the storage key and is not part of the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    /// Policies granted on successful login (sorted, de-duplicated)
    pub policies: Vec<String>,
    /// Number of uses of the issued credential (0 = unlimited)
    pub num_uses: u32,
    /// Credential TTL (0 = mount default)
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Credential max TTL (0 = mount default)
    #[serde(with = "duration_secs")]
    pub max_ttl: Duration,
    /// Claim used for the alias name
    pub user_claim: String,
    /// Optional claim copied into alias metadata as `email`
    pub email_claim: String,
    /// Optional claim copied into alias metadata as `given_name`
    pub given_name_claim: String,
    /// Claims that must all be present with exactly these values
    pub bound_claims: BTreeMap<String, ClaimValue>,
}

impl Default for Role {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            num_uses: 0,
            ttl: Duration::ZERO,
            max_ttl: Duration::ZERO,
            user_claim: DEFAULT_USER_CLAIM.to_string(),
            email_claim: DEFAULT_EMAIL_CLAIM.to_string(),
            given_name_claim: DEFAULT_GIVEN_NAME_CLAIM.to_string(),
            bound_claims: BTreeMap::new(),
        }
    }
}

impl Role {
    /// Build a role by applying `update` over the defaults (create semantics).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the resulting role is invalid.
    pub fn create(update: RoleUpdate) -> Result<Self> {
        let mut role = Self::default();
        role.apply(update)?;
        Ok(role)
    }

    /// Merge the fields present in `update` into this role (update semantics).
    ///
    /// The role is left untouched when the merged result fails validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the merged role is invalid.
    pub fn apply(&mut self, update: RoleUpdate) -> Result<()> {
        let mut merged = self.clone();

        if let Some(policies) = update.policies {
            merged.policies = parse_policies(&policies);
        }
        if let Some(num_uses) = update.num_uses {
            merged.num_uses = u32::try_from(num_uses).map_err(|_| {
                Error::InvalidRequest(if num_uses < 0 {
                    "num_uses cannot be negative".to_string()
                } else {
                    format!("num_uses {num_uses} is too large")
                })
            })?;
        }
        if let Some(ttl) = update.ttl {
            merged.ttl = ttl;
        }
        if let Some(max_ttl) = update.max_ttl {
            merged.max_ttl = max_ttl;
        }
        if let Some(claim) = update.user_claim {
            merged.user_claim = claim;
        }
        if let Some(claim) = update.email_claim {
            merged.email_claim = claim;
        }
        if let Some(claim) = update.given_name_claim {
            merged.given_name_claim = claim;
        }
        if let Some(bound) = update.bound_claims {
            merged.bound_claims = bound;
        }

        merged.validate()?;
        *self = merged;
        Ok(())
    }

    /// Check role invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] when the user claim is empty or
    /// `ttl` exceeds a non-zero `max_ttl`.
    pub fn validate(&self) -> Result<()> {
        if self.user_claim.is_empty() {
            return Err(Error::InvalidRequest(
                "a user claim must be defined on the role".to_string(),
            ));
        }
        if !self.max_ttl.is_zero() && self.ttl > self.max_ttl {
            return Err(Error::InvalidRequest(
                "ttl should not be greater than max_ttl".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial role write. `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    /// Raw policy names, normalised by [`parse_policies`]
    pub policies: Option<Vec<String>>,
    /// Signed so that a negative value can be reported instead of wrapping
    pub num_uses: Option<i64>,
    /// Credential TTL
    pub ttl: Option<Duration>,
    /// Credential max TTL
    pub max_ttl: Option<Duration>,
    /// Alias name claim
    pub user_claim: Option<String>,
    /// Email metadata claim
    pub email_claim: Option<String>,
    /// Given-name metadata claim
    pub given_name_claim: Option<String>,
    /// Required claim values
    pub bound_claims: Option<BTreeMap<String, ClaimValue>>,
}

/// Normalise policy names: split on commas, trim, lower-case, drop empties,
/// de-duplicate and sort.
#[must_use]
pub fn parse_policies(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|p| p.split(','))
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
