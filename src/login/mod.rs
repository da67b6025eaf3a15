//! Interactive browser login.
//!
//! [`LoginFlow::run`] drives one session:
//!
//! 1. bind a loopback listener on an OS-assigned port
//! 2. fetch the authorization URL from the server and point its
//!    `redirect_uri` and `state` at this session
//! 3. serve the callback route and open the browser
//! 4. wait for the callback until the session deadline
//!
//! The callback handler forwards the code to the server's `login` endpoint
//! and hands the result back through a one-shot channel. The listener is shut
//! down on every exit path, so the port is released even on timeout.

pub mod browser;
pub mod callback;
pub mod remote;
pub mod session;
pub mod token_file;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::credential::IssuedCredential;
use crate::{Error, Result};

pub use browser::{BrowserLauncher, PrintUrl, SystemBrowser};
pub use callback::{CallbackContext, CallbackParams, callback_router};
pub use remote::{HttpRemote, LoginRemote};
pub use session::{LoginSession, SessionState};
pub use token_file::TokenFile;

/// Default role
pub const DEFAULT_ROLE: &str = "default";
/// Default mount path of the endpoint set
pub const DEFAULT_MOUNT: &str = "/auth/oauth";
/// Default session deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const MIN_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Interactive login against a remote endpoint set
pub struct LoginFlow {
    remote: Arc<dyn LoginRemote>,
    browser: Arc<dyn BrowserLauncher>,
    role: String,
    mount: String,
    timeout: Duration,
}

impl LoginFlow {
    /// Flow with the default role, mount and timeout
    pub fn new(remote: Arc<dyn LoginRemote>, browser: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            remote,
            browser,
            role: DEFAULT_ROLE.to_string(),
            mount: DEFAULT_MOUNT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Role to log in with
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Mount path of the endpoint set (determines the callback path)
    #[must_use]
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    /// Session deadline, absolute from session start
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A fresh session for this flow
    #[must_use]
    pub fn session(&self) -> LoginSession {
        LoginSession::new(&self.mount, self.timeout)
    }

    /// Run a complete interactive login
    pub async fn run(&self) -> Result<IssuedCredential> {
        let session = self.session();
        self.run_session(&session).await
    }

    /// Run `session` to completion
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no callback arrived before the deadline
    /// - [`Error::CsrfMismatch`] if the callback state did not match
    /// - the login error reported by the server otherwise
    pub async fn run_session(&self, session: &LoginSession) -> Result<IssuedCredential> {
        let result = self.drive(session).await;
        if result.is_err() {
            session.transition(SessionState::Failed);
        }
        result
    }

    /// Submit a manually copied code (out-of-band redirect, no listener)
    pub async fn login_with_code(&self, code: &str) -> Result<IssuedCredential> {
        self.remote.login(code, None, &self.role).await
    }

    async fn drive(&self, session: &LoginSession) -> Result<IssuedCredential> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind callback server: {e}")))?;
        let port = listener.local_addr()?.port();
        let redirect_url = format!("http://127.0.0.1:{port}{}", session.callback_path());
        session.transition(SessionState::Listening);
        info!(url = %redirect_url, "Callback server listening");

        let auth_url = authorization_url(
            self.remote.auth_url().await?,
            &redirect_url,
            session.nonce(),
        );

        let (tx, rx) = oneshot::channel();
        let ctx = Arc::new(CallbackContext::new(
            session.clone(),
            redirect_url,
            self.role.clone(),
            Arc::clone(&self.remote),
            tx,
        ));
        let app = callback_router(ctx);

        let shutdown = CancellationToken::new();
        let graceful = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
        });

        session.transition(SessionState::AwaitingCallback);
        browser::launch(self.browser.as_ref(), &auth_url);

        let outcome = match tokio::time::timeout_at(session.deadline(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Internal(
                "Callback channel closed unexpectedly".to_string(),
            )),
            Err(_) => {
                warn!("No callback received before the deadline");
                Err(Error::Timeout)
            }
        };

        stop_server(server, &shutdown, session.deadline()).await;
        outcome
    }
}

/// Point `url` at this session: any existing `redirect_uri` and `state`
/// parameters are replaced
#[must_use]
pub fn authorization_url(mut url: Url, redirect_uri: &str, state: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "redirect_uri" && k != "state")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state);
    url
}

/// Graceful shutdown, then abort after the grace period
async fn stop_server(
    mut server: JoinHandle<io::Result<()>>,
    shutdown: &CancellationToken,
    deadline: Instant,
) {
    shutdown.cancel();
    let grace = deadline
        .saturating_duration_since(Instant::now())
        .max(MIN_SHUTDOWN_GRACE);

    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => debug!("Callback server stopped"),
        Ok(Ok(Err(e))) => warn!(error = %e, "Callback server failed"),
        Ok(Err(e)) => warn!(error = %e, "Callback server task failed"),
        Err(_) => {
            warn!("Callback server did not stop in time; aborting");
            server.abort();
            let _ = server.await;
        }
    }
}
