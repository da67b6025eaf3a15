//! Interactive login flow end to end
//!
//! The remote endpoint set is a call-counting stub and the "browser" hands
//! the authorization URL to the test, which then plays the provider redirect
//! against the real loopback listener.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use oidc_login::credential::IssuedCredential;
use oidc_login::login::{
    BrowserLauncher, CallbackContext, LoginFlow, LoginRemote, LoginSession, SessionState,
    callback_router,
};
use oidc_login::{Error, Result};
use oidc_login_core::{Alias, LoginOutcome};
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, oneshot};
use tower::ServiceExt;
use url::Url;

#[derive(Default)]
struct CountingRemote {
    logins: AtomicUsize,
    codes: parking_lot::Mutex<Vec<(String, Option<String>, String)>>,
}

#[async_trait]
impl LoginRemote for CountingRemote {
    async fn auth_url(&self) -> Result<Url> {
        Url::parse(
            "https://idp.example/authorize?client_id=cid&redirect_uri=urn%3Aietf%3Awg%3Aoauth%3A2.0%3Aoob&response_type=code&scope=openid+email",
        )
        .map_err(|e| Error::Internal(e.to_string()))
    }

    async fn login(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        role: &str,
    ) -> Result<IssuedCredential> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().push((
            code.to_string(),
            redirect_uri.map(str::to_string),
            role.to_string(),
        ));
        if code == "bad-code" {
            return Err(Error::Server {
                status: 502,
                message: "Code exchange failed: invalid_grant".to_string(),
            });
        }
        Ok(IssuedCredential::issue(&LoginOutcome {
            policies: vec!["admin".to_string()],
            num_uses: 0,
            ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(3600),
            display_name: format!("user-for-{code}"),
            alias: Alias {
                name: format!("user-for-{code}"),
                metadata: BTreeMap::new(),
            },
        }))
    }
}

struct CapturingBrowser(mpsc::UnboundedSender<Url>);

impl BrowserLauncher for CapturingBrowser {
    fn open(&self, url: &Url) -> io::Result<()> {
        let _ = self.0.send(url.clone());
        Ok(())
    }
}

struct BrokenBrowser;

impl BrowserLauncher for BrokenBrowser {
    fn open(&self, _url: &Url) -> io::Result<()> {
        Err(io::Error::other("no display"))
    }
}

fn param(url: &Url, name: &str) -> String {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

struct Running {
    session: LoginSession,
    auth_url: Url,
    result: tokio::task::JoinHandle<Result<IssuedCredential>>,
}

async fn start(remote: Arc<CountingRemote>, timeout: Duration) -> Running {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let flow = LoginFlow::new(remote, Arc::new(CapturingBrowser(tx)))
        .with_role("dev")
        .with_timeout(timeout);
    let session = flow.session();
    let running = session.clone();
    let result = tokio::spawn(async move { flow.run_session(&running).await });
    let auth_url = rx.recv().await.unwrap();
    Running {
        session,
        auth_url,
        result,
    }
}

fn callback_url(running: &Running, query: &str) -> String {
    format!("{}?{query}", param(&running.auth_url, "redirect_uri"))
}

#[tokio::test]
async fn successful_callback_returns_credential() {
    // GIVEN: a running session
    let remote = Arc::new(CountingRemote::default());
    let running = start(Arc::clone(&remote), Duration::from_secs(30)).await;
    assert_eq!(running.session.state(), SessionState::AwaitingCallback);

    // THEN: the authorization URL points back at this session
    let redirect_uri = param(&running.auth_url, "redirect_uri");
    assert!(redirect_uri.starts_with("http://127.0.0.1:"));
    assert!(redirect_uri.ends_with("/auth/oauth/cb"));
    assert_eq!(param(&running.auth_url, "state"), running.session.nonce());
    assert_eq!(param(&running.auth_url, "client_id"), "cid");

    // WHEN: the provider redirects with the matching state
    let url = callback_url(
        &running,
        &format!("code=good-code&state={}", running.session.nonce()),
    );
    let response = reqwest::get(&url).await.unwrap();

    // THEN
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "authentication successful");
    let credential = running.result.await.unwrap().unwrap();
    assert_eq!(credential.display_name, "user-for-good-code");
    assert_eq!(running.session.state(), SessionState::Succeeded);
    assert_eq!(
        remote.codes.lock().clone(),
        vec![("good-code".to_string(), Some(redirect_uri), "dev".to_string())]
    );
}

#[tokio::test]
async fn failed_login_is_reported_and_returned() {
    let remote = Arc::new(CountingRemote::default());
    let running = start(Arc::clone(&remote), Duration::from_secs(30)).await;

    let url = callback_url(
        &running,
        &format!("code=bad-code&state={}", running.session.nonce()),
    );
    let response = reqwest::get(&url).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("authentication error: "));
    assert!(body.contains("invalid_grant"));
    let result = running.result.await.unwrap();
    assert!(matches!(result, Err(Error::Server { status: 502, .. })));
    assert_eq!(running.session.state(), SessionState::Failed);
}

#[tokio::test]
async fn state_mismatch_aborts_without_login() {
    // GIVEN
    let remote = Arc::new(CountingRemote::default());
    let running = start(Arc::clone(&remote), Duration::from_secs(30)).await;

    // WHEN: a forged redirect arrives
    let url = callback_url(&running, "code=stolen&state=forged");
    let response = reqwest::get(&url).await.unwrap();

    // THEN: no diagnostic body, no login call, typed failure
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().is_empty());
    let result = running.result.await.unwrap();
    assert!(matches!(result, Err(Error::CsrfMismatch)));
    assert_eq!(remote.logins.load(Ordering::SeqCst), 0);
    assert_eq!(running.session.state(), SessionState::Failed);
}

#[tokio::test]
async fn missing_state_is_treated_as_mismatch() {
    let remote = Arc::new(CountingRemote::default());
    let running = start(Arc::clone(&remote), Duration::from_secs(30)).await;

    let url = callback_url(&running, "code=good-code");
    let response = reqwest::get(&url).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(matches!(running.result.await.unwrap(), Err(Error::CsrfMismatch)));
    assert_eq!(remote.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn timeout_releases_listener() {
    // GIVEN: a short deadline and a browser that never redirects
    let remote = Arc::new(CountingRemote::default());
    let running = start(Arc::clone(&remote), Duration::from_millis(300)).await;
    let redirect = Url::parse(&param(&running.auth_url, "redirect_uri")).unwrap();
    let port = redirect.port().unwrap();

    // WHEN
    let result = running.result.await.unwrap();

    // THEN: timeout, and the port can be bound again
    assert!(matches!(result, Err(Error::Timeout)));
    assert_eq!(running.session.state(), SessionState::Failed);
    assert_eq!(remote.logins.load(Ordering::SeqCst), 0);
    let rebound = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
    assert!(rebound.is_ok(), "port {port} still in use");
}

#[tokio::test]
async fn browser_failure_is_not_fatal() {
    let remote = Arc::new(CountingRemote::default());
    let flow = LoginFlow::new(remote, Arc::new(BrokenBrowser))
        .with_timeout(Duration::from_millis(200));

    let result = flow.run().await;

    assert!(matches!(result, Err(Error::Timeout)));
}

#[tokio::test]
async fn only_the_first_callback_is_honored() {
    // GIVEN: one session's callback router
    let remote = Arc::new(CountingRemote::default());
    let session = LoginSession::new("/auth/oauth", Duration::from_secs(30));
    session.transition(SessionState::Listening);
    session.transition(SessionState::AwaitingCallback);
    let (tx, rx) = oneshot::channel();
    let app = callback_router(Arc::new(CallbackContext::new(
        session.clone(),
        "http://127.0.0.1:1/auth/oauth/cb".to_string(),
        "default".to_string(),
        Arc::clone(&remote) as Arc<dyn LoginRemote>,
        tx,
    )));
    let request = |code: &str| {
        Request::get(format!("/auth/oauth/cb?code={code}&state={}", session.nonce()))
            .body(Body::empty())
            .unwrap()
    };

    // WHEN: two valid redirects arrive with different codes
    let first = app.clone().oneshot(request("first")).await.unwrap();
    let second = app.clone().oneshot(request("second")).await.unwrap();

    // THEN: only the first reached the server and decided the session
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(remote.logins.load(Ordering::SeqCst), 1);
    let credential = rx.await.unwrap().unwrap();
    assert_eq!(credential.display_name, "user-for-first");
    assert_eq!(session.state(), SessionState::Succeeded);
}

#[tokio::test]
async fn manual_code_skips_redirect() {
    let remote = Arc::new(CountingRemote::default());
    let flow = LoginFlow::new(Arc::clone(&remote) as Arc<dyn LoginRemote>, Arc::new(BrokenBrowser))
        .with_role("ops");

    let credential = flow.login_with_code("pasted").await.unwrap();

    assert_eq!(credential.display_name, "user-for-pasted");
    assert_eq!(
        remote.codes.lock().clone(),
        vec![("pasted".to_string(), None, "ops".to_string())]
    );
}
