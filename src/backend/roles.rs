//! Role CRUD over the storage collaborator.
//!
//! Each role lives at its own key (`role/<name>`), so operations on different
//! role names never contend; concurrent writes to one name are last-writer-wins.

use std::sync::Arc;
use std::time::Duration;

use oidc_login_core::{Role, RoleUpdate};

use super::storage::Storage;
use crate::{Error, Result};

/// Storage prefix for roles
pub const ROLE_PREFIX: &str = "role/";

const MAX_TTL_WARNING: &str = "max_ttl is greater than the system or backend mount's maximum TTL value; issued tokens' max TTL value will be truncated";

/// Result of a role write
#[derive(Debug, Clone, PartialEq)]
pub struct RoleWrite {
    /// The role as stored
    pub role: Role,
    /// Non-fatal advisories for the caller
    pub warnings: Vec<String>,
}

/// Named roles
#[derive(Clone)]
pub struct RoleStore {
    storage: Arc<dyn Storage>,
    max_lease_ttl: Duration,
}

impl RoleStore {
    /// Create a store over `storage`; `max_lease_ttl` is the ceiling used for
    /// `max_ttl` warnings
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, max_lease_ttl: Duration) -> Self {
        Self {
            storage,
            max_lease_ttl,
        }
    }

    /// Load a role; `Ok(None)` when it does not exist
    pub async fn get(&self, name: &str) -> Result<Option<Role>> {
        let key = role_key(name)?;
        match self.storage.get(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Create (or fully replace) a role: `update` is applied over the defaults
    pub async fn create(&self, name: &str, update: RoleUpdate) -> Result<RoleWrite> {
        let key = role_key(name)?;
        let role = Role::create(update)?;
        self.save(&key, role).await
    }

    /// Merge `update` into an existing role
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoleNotFound`] if the role does not exist.
    pub async fn update(&self, name: &str, update: RoleUpdate) -> Result<RoleWrite> {
        let key = role_key(name)?;
        let mut role = self
            .get(name)
            .await?
            .ok_or_else(|| Error::RoleNotFound(normalize_name(name)))?;
        role.apply(update)?;
        self.save(&key, role).await
    }

    /// Delete a role; deleting an absent role is not an error
    pub async fn delete(&self, name: &str) -> Result<()> {
        let key = role_key(name)?;
        self.storage.delete(&key).await
    }

    /// Role names in lexical order
    pub async fn list(&self) -> Result<Vec<String>> {
        self.storage.list(ROLE_PREFIX).await
    }

    async fn save(&self, key: &str, role: Role) -> Result<RoleWrite> {
        let mut warnings = Vec::new();
        if role.max_ttl > self.max_lease_ttl {
            warnings.push(MAX_TTL_WARNING.to_string());
        }
        self.storage.put(key, serde_json::to_vec(&role)?).await?;
        Ok(RoleWrite { role, warnings })
    }
}

/// Role names are case-insensitive and stored lower-case
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn role_key(name: &str) -> Result<String> {
    let name = normalize_name(name);
    if name.is_empty() {
        return Err(Error::InvalidRequest("missing role name".to_string()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::InvalidRequest(format!("invalid role name {name:?}")));
    }
    Ok(format!("{ROLE_PREFIX}{name}"))
}
