//! Error types for the OIDC login backend and client

use std::io;

use thiserror::Error;

/// Result type alias for OIDC login
pub type Result<T> = std::result::Result<T, Error>;

/// OIDC login errors
#[derive(Error, Debug)]
pub enum Error {
    /// No provider configuration has been saved yet
    #[error("plugin is not yet configured")]
    NotConfigured,

    /// Issuer metadata unreachable or invalid
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Authorization code exchange rejected by the provider
    #[error("Code exchange failed: {0}")]
    Exchange(String),

    /// The token response carried no ID token
    #[error("No id_token was returned. Maybe not requesting the right scopes?")]
    TokenMissing,

    /// ID token signature, issuer, audience or expiry check failed
    #[error("ID token verification failed: {0}")]
    Verification(String),

    /// Role does not exist
    #[error("role {0:?} does not exist")]
    RoleNotFound(String),

    /// Missing required field or out-of-range value
    #[error("{0}")]
    InvalidRequest(String),

    /// The role's user claim is absent from the ID token
    #[error("User claim ({0}) is missing")]
    MissingUserClaim(String),

    /// A bound claim is absent or has a different value
    #[error("claims do not match bound_claims of role")]
    BoundClaimMismatch(String),

    /// No callback arrived before the deadline
    #[error("Timed out waiting for response")]
    Timeout,

    /// The callback carried a state that does not match the session
    #[error("state mismatch in callback - possible CSRF attack")]
    CsrfMismatch,

    /// The endpoint set answered a client request with an error
    #[error("Error making API request. Code: {status}. Errors: {message}")]
    Server {
        /// HTTP status returned by the server
        status: u16,
        /// Joined `errors` array of the response body
        message: String,
    },

    /// A successful login response carried no client token
    #[error("Response contained no authentication information")]
    MissingCredential,

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code reported for this error by the endpoint set
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::MissingUserClaim(_) | Self::CsrfMismatch | Self::Json(_) => 400,
            Self::Verification(_) => 401,
            Self::BoundClaimMismatch(_) => 403,
            Self::RoleNotFound(_) => 404,
            Self::Discovery(_) | Self::Exchange(_) | Self::TokenMissing => 502,
            Self::NotConfigured => 503,
            Self::Timeout => 504,
            Self::Server { status, .. } => *status,
            _ => 500,
        }
    }
}

impl From<oidc_login_core::Error> for Error {
    fn from(err: oidc_login_core::Error) -> Self {
        use oidc_login_core::Error as Core;
        match err {
            Core::RoleNotFound(name) => Self::RoleNotFound(name),
            Core::InvalidRequest(msg) => Self::InvalidRequest(msg),
            Core::MissingUserClaim(claim) => Self::MissingUserClaim(claim),
            Core::BoundClaimMismatch(claim) => Self::BoundClaimMismatch(claim),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        assert_eq!(Error::NotConfigured.status_code(), 503);
        assert_eq!(Error::RoleNotFound("x".into()).status_code(), 404);
        assert_eq!(Error::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(Error::MissingUserClaim("sub".into()).status_code(), 400);
        assert_eq!(Error::BoundClaimMismatch("hd".into()).status_code(), 403);
        assert_eq!(Error::Verification("bad sig".into()).status_code(), 401);
        assert_eq!(Error::Exchange("invalid_grant".into()).status_code(), 502);
        assert_eq!(Error::TokenMissing.status_code(), 502);
        assert_eq!(Error::Timeout.status_code(), 504);
        assert_eq!(Error::Storage("disk".into()).status_code(), 500);
        assert_eq!(
            Error::Server { status: 403, message: "denied".into() }.status_code(),
            403
        );
    }

    #[test]
    fn core_errors_keep_their_kind() {
        let err: Error = oidc_login_core::Error::RoleNotFound("dev".into()).into();
        assert!(matches!(err, Error::RoleNotFound(ref n) if n == "dev"));

        let err: Error = oidc_login_core::Error::BoundClaimMismatch("hd".into()).into();
        assert_eq!(err.to_string(), "claims do not match bound_claims of role");
    }

    #[test]
    fn messages_match_client_diagnostics() {
        assert_eq!(Error::Timeout.to_string(), "Timed out waiting for response");
        assert_eq!(Error::NotConfigured.to_string(), "plugin is not yet configured");
        assert_eq!(
            Error::MissingUserClaim("sub".into()).to_string(),
            "User claim (sub) is missing"
        );
    }
}
