//! OIDC Login Library
//!
//! Authenticates end users against an OAuth 2.0 / OpenID Connect provider
//! and turns the verified ID token claims into a credential.
//!
//! # Components
//!
//! - **Identity provider client** ([`provider`]): discovery, authorization
//!   URL construction, code exchange and ID token verification
//! - **Endpoint set** ([`backend`]): provider configuration, roles with bound
//!   claims, and the login operation, served over HTTP by [`server`]
//! - **Interactive login** ([`login`]): loopback callback server, CSRF state
//!   nonce, browser launch and a deadline-bound wait
//!
//! Claim authorization itself is network-free and lives in the
//! `oidc-login-core` crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod backend;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod login;
pub mod provider;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to initialise tracing: {e}")))
}
