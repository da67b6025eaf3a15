//! Error types for the login core

use thiserror::Error;

/// Result type alias for the login core
pub type Result<T> = std::result::Result<T, Error>;

/// Authorization and role validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The named role does not exist
    #[error("role {0:?} does not exist")]
    RoleNotFound(String),

    /// A required field is missing or a value is out of range
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The role's user claim is absent from the claim set or not a string
    #[error("user claim ({0}) is missing")]
    MissingUserClaim(String),

    /// A bound claim is absent or carries a different value
    #[error("claims do not match bound_claims of role (claim {0:?})")]
    BoundClaimMismatch(String),
}
