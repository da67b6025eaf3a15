//! One interactive login session.
//!
//! A session moves through
//! `Initialized → Listening → AwaitingCallback → {Succeeded | Failed}`.
//! Terminal states are final: once a session has left `AwaitingCallback`,
//! later transitions are ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;

/// Lifecycle of a login session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nonce generated, nothing bound yet
    Initialized,
    /// Loopback listener bound
    Listening,
    /// Browser launched, waiting for the redirect
    AwaitingCallback,
    /// A credential was obtained
    Succeeded,
    /// The login failed, timed out or was rejected
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::Listening => "listening",
            Self::AwaitingCallback => "awaiting_callback",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-run state shared by the flow and its callback handler
#[derive(Clone)]
pub struct LoginSession {
    nonce: Arc<str>,
    callback_path: Arc<str>,
    deadline: Instant,
    state: Arc<Mutex<SessionState>>,
}

impl fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginSession")
            .field("callback_path", &self.callback_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LoginSession {
    /// Start a session for the endpoint set mounted at `mount`; the deadline
    /// is absolute from now
    #[must_use]
    pub fn new(mount: &str, timeout: Duration) -> Self {
        Self {
            nonce: generate_nonce().into(),
            callback_path: callback_path(mount).into(),
            deadline: Instant::now() + timeout,
            state: Arc::new(Mutex::new(SessionState::Initialized)),
        }
    }

    /// State nonce echoed through the authorization round trip
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Path of the loopback callback route
    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Absolute deadline of the session
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next`; returns `false` and changes nothing once the session
    /// is terminal. `Succeeded` is only reachable from `AwaitingCallback`.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        if next == SessionState::Succeeded && *state != SessionState::AwaitingCallback {
            return false;
        }
        tracing::debug!(from = %*state, to = %next, "Login session transition");
        *state = next;
        true
    }
}

/// Callback route for a mount path: `<mount>/cb`
#[must_use]
pub fn callback_path(mount: &str) -> String {
    let mount = mount.trim_end_matches('/');
    if mount.starts_with('/') {
        format!("{mount}/cb")
    } else {
        format!("/{mount}/cb")
    }
}

/// 32 random bytes, base64url without padding
#[must_use]
pub fn generate_nonce() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_url_safe_and_unique() {
        let a = generate_nonce();
        let b = generate_nonce();

        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(a, b);
    }

    #[test]
    fn callback_path_is_derived_from_mount() {
        assert_eq!(callback_path("/auth/oauth"), "/auth/oauth/cb");
        assert_eq!(callback_path("/auth/corp/"), "/auth/corp/cb");
        assert_eq!(callback_path("auth/oauth"), "/auth/oauth/cb");
    }

    #[tokio::test]
    async fn session_walks_the_happy_path() {
        let session = LoginSession::new("/auth/oauth", Duration::from_secs(300));
        assert_eq!(session.state(), SessionState::Initialized);

        assert!(session.transition(SessionState::Listening));
        assert!(session.transition(SessionState::AwaitingCallback));
        assert!(session.transition(SessionState::Succeeded));

        assert_eq!(session.state(), SessionState::Succeeded);
    }

    #[tokio::test]
    async fn terminal_state_is_final() {
        // GIVEN: a session that already failed
        let session = LoginSession::new("/auth/oauth", Duration::from_secs(300));
        session.transition(SessionState::Listening);
        session.transition(SessionState::AwaitingCallback);
        assert!(session.transition(SessionState::Failed));

        // WHEN: a late success arrives
        let changed = session.transition(SessionState::Succeeded);

        // THEN: it is ignored
        assert!(!changed);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn cannot_succeed_without_awaiting_callback() {
        let session = LoginSession::new("/auth/oauth", Duration::from_secs(300));
        assert!(!session.transition(SessionState::Succeeded));
        assert!(session.transition(SessionState::Failed));
    }

    #[tokio::test]
    async fn deadline_is_absolute_from_creation() {
        let before = Instant::now();
        let session = LoginSession::new("/auth/oauth", Duration::from_secs(300));
        assert!(session.deadline() >= before + Duration::from_secs(300));
        assert!(session.deadline() <= Instant::now() + Duration::from_secs(300));
    }
}
