//! Client for a remote authentication endpoint set.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::credential::IssuedCredential;
use crate::{Error, Result};

/// The endpoint set as seen by the interactive flow
#[async_trait]
pub trait LoginRemote: Send + Sync {
    /// `GET auth-request`
    async fn auth_url(&self) -> Result<Url>;

    /// `POST login`; `redirect_uri` is omitted from the request when `None`
    async fn login(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        role: &str,
    ) -> Result<IssuedCredential>;
}

/// [`LoginRemote`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base: Url,
}

#[derive(Deserialize)]
struct AuthRequestResponse {
    data: AuthRequestData,
}

#[derive(Deserialize)]
struct AuthRequestData {
    url: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: Option<IssuedCredential>,
}

#[derive(Deserialize, Default)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

impl HttpRemote {
    /// Client for the endpoint set mounted at `mount` on the server `addr`
    pub fn new(addr: &str, mount: &str) -> Result<Self> {
        let base = endpoint_base(addr, mount)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("oidc-login/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base })
    }

    /// Base URL all endpoint paths are joined onto
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid endpoint path {path:?}: {e}")))
    }
}

#[async_trait]
impl LoginRemote for HttpRemote {
    async fn auth_url(&self) -> Result<Url> {
        let url = self.endpoint("auth-request")?;
        debug!(url = %url, "Requesting authorization URL");

        let response = self.http.get(url).send().await?;
        let body: AuthRequestResponse = check_status(response).await?.json().await?;

        Url::parse(&body.data.url)
            .map_err(|e| Error::Internal(format!("Server returned an invalid authorization URL: {e}")))
    }

    async fn login(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        role: &str,
    ) -> Result<IssuedCredential> {
        let url = self.endpoint("login")?;
        let mut body = json!({"code": code, "role": role});
        if let Some(redirect_uri) = redirect_uri {
            body["redirect_uri"] = json!(redirect_uri);
        }
        debug!(url = %url, role = %role, "Submitting authorization code");

        let response = self.http.post(url).json(&body).send().await?;
        let body: LoginResponse = check_status(response).await?.json().await?;

        match body.auth {
            Some(auth) if !auth.client_token.is_empty() => Ok(auth),
            _ => Err(Error::MissingCredential),
        }
    }
}

/// `<addr>/<mount>/` with exactly one slash between segments
pub fn endpoint_base(addr: &str, mount: &str) -> Result<Url> {
    let mount = mount.trim_matches('/');
    let raw = format!("{}/{mount}/", addr.trim_end_matches('/'));
    Url::parse(&raw).map_err(|e| Error::Config(format!("Invalid server address {addr:?}: {e}")))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
        _ if text.is_empty() => status.canonical_reason().unwrap_or("unknown error").to_string(),
        _ => text,
    };
    Err(Error::Server {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential_json() -> serde_json::Value {
        json!({
            "client_token": "olt_abc",
            "accessor": "acc",
            "policies": ["dev"],
            "num_uses": 0,
            "lease_duration": 300,
            "max_lease_duration": 3600,
            "display_name": "u1",
            "alias": {"name": "u1", "metadata": {}},
            "issued_at": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn endpoint_base_normalises_slashes() {
        let base = endpoint_base("http://127.0.0.1:8200/", "/auth/oauth/").unwrap();
        assert_eq!(base.as_str(), "http://127.0.0.1:8200/auth/oauth/");
        assert_eq!(
            base.join("login").unwrap().as_str(),
            "http://127.0.0.1:8200/auth/oauth/login"
        );
    }

    #[tokio::test]
    async fn auth_url_reads_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/oauth/auth-request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"data": {"url": "https://idp.example/authorize?client_id=cid"}}),
            ))
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), "/auth/oauth").unwrap();
        let url = remote.auth_url().await.unwrap();

        assert_eq!(url.as_str(), "https://idp.example/authorize?client_id=cid");
    }

    #[tokio::test]
    async fn login_posts_code_role_and_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/oauth/login"))
            .and(body_json(json!({
                "code": "abc",
                "role": "default",
                "redirect_uri": "http://127.0.0.1:1234/auth/oauth/cb"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": credential_json()})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), "/auth/oauth").unwrap();
        let credential = remote
            .login("abc", Some("http://127.0.0.1:1234/auth/oauth/cb"), "default")
            .await
            .unwrap();

        assert_eq!(credential.client_token, "olt_abc");
        assert_eq!(credential.policies, vec!["dev"]);
    }

    #[tokio::test]
    async fn login_without_redirect_omits_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/oauth/login"))
            .and(body_json(json!({"code": "abc", "role": "default"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": credential_json()})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), "/auth/oauth").unwrap();
        assert!(remote.login("abc", None, "default").await.is_ok());
    }

    #[tokio::test]
    async fn missing_auth_block_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/oauth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": null})))
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), "/auth/oauth").unwrap();
        let result = remote.login("abc", None, "default").await;

        assert!(matches!(result, Err(Error::MissingCredential)));
    }

    #[tokio::test]
    async fn server_errors_carry_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/oauth/login"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"errors": ["claims do not match bound_claims of role"]})),
            )
            .mount(&server)
            .await;

        let remote = HttpRemote::new(&server.uri(), "/auth/oauth").unwrap();
        let err = remote.login("abc", None, "default").await.unwrap_err();

        match err {
            Error::Server { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "claims do not match bound_claims of role");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
