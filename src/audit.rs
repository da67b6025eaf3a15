//! Audit logging for logins and administrative writes.
//!
//! Every event is emitted via `tracing::info!` with the serialized event in
//! the `audit` field, so the trail can be filtered out of ordinary logs by any
//! log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `login.succeeded` | A credential was issued |
//! | `login.denied` | Code exchange, verification or role authorization failed |
//! | `config.written` | The provider configuration was replaced |
//! | `role.written` | A role was created or updated |
//! | `role.deleted` | A role was deleted |
//!
//! Client secrets, authorization codes and issued tokens never appear here.
//! Logins are identified by the credential accessor.

use serde::Serialize;

use crate::credential::IssuedCredential;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"login.succeeded"`).
    pub event: &'static str,
    /// Role involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Alias name of the authenticated user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Accessor of the issued credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessor: Option<String>,
    /// Granted policies (for `login.succeeded`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<String>>,
    /// Provider issuer (for `config.written`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Human-readable reason for a denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            role: None,
            alias: None,
            accessor: None,
            policies: None,
            issuer: None,
            reason: None,
        }
    }

    /// Construct a `login.succeeded` event.
    #[must_use]
    pub fn login_succeeded(role: &str, credential: &IssuedCredential) -> Self {
        Self {
            role: Some(role.to_string()),
            alias: Some(credential.alias.name.clone()),
            accessor: Some(credential.accessor.clone()),
            policies: Some(credential.policies.clone()),
            ..Self::new("login.succeeded")
        }
    }

    /// Construct a `login.denied` event.
    #[must_use]
    pub fn login_denied(role: &str, reason: impl Into<String>) -> Self {
        Self {
            role: Some(role.to_string()),
            reason: Some(reason.into()),
            ..Self::new("login.denied")
        }
    }

    /// Construct a `config.written` event.
    #[must_use]
    pub fn config_written(issuer: &str) -> Self {
        Self {
            issuer: Some(issuer.to_string()),
            ..Self::new("config.written")
        }
    }

    /// Construct a `role.written` event.
    #[must_use]
    pub fn role_written(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            ..Self::new("role.written")
        }
    }

    /// Construct a `role.deleted` event.
    #[must_use]
    pub fn role_deleted(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            ..Self::new("role.deleted")
        }
    }
}

/// Emit an audit event via `tracing::info!`.
///
/// ```text
/// INFO oidc_login::audit audit={"event":"login.succeeded","role":"dev",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "oidc-login audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
