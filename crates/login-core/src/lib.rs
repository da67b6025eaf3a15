//! OIDC Login Core
//!
//! Network-free primitives shared by the login backend and its tests:
//!
//! - [`Claims`] / [`ClaimValue`]: the verified claim set of one login attempt
//! - [`Role`] / [`RoleUpdate`]: named authorization policies and their merge rules
//! - [`authorize`]: the pure role authorizer that turns claims + role into a
//!   [`LoginOutcome`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod authorize;
mod claims;
mod error;
mod role;

pub use authorize::{Alias, LoginOutcome, authorize};
pub use claims::{ClaimValue, Claims};
pub use error::{Error, Result};
pub use role::{DEFAULT_EMAIL_CLAIM, DEFAULT_GIVEN_NAME_CLAIM, DEFAULT_USER_CLAIM, Role, RoleUpdate, parse_policies};
