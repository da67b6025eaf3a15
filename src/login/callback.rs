//! Loopback callback server
//!
//! One router per login session, serving only the session's callback path.
//! The first request to arrive claims the session; later requests are
//! answered with `409 Conflict` and never reach the server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::remote::LoginRemote;
use super::session::{LoginSession, SessionState};
use crate::credential::IssuedCredential;
use crate::{Error, Result};

/// Redirect query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// Echoed state nonce
    pub state: Option<String>,

    /// Error code from the provider
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// State shared with the callback handler
pub struct CallbackContext {
    session: LoginSession,
    redirect_url: String,
    role: String,
    remote: Arc<dyn LoginRemote>,
    tx: Mutex<Option<oneshot::Sender<Result<IssuedCredential>>>>,
}

impl CallbackContext {
    /// Context delivering the session result through `tx`
    pub fn new(
        session: LoginSession,
        redirect_url: String,
        role: String,
        remote: Arc<dyn LoginRemote>,
        tx: oneshot::Sender<Result<IssuedCredential>>,
    ) -> Self {
        Self {
            session,
            redirect_url,
            role,
            remote,
            tx: Mutex::new(Some(tx)),
        }
    }
}

/// Router serving the session's callback path
pub fn callback_router(ctx: Arc<CallbackContext>) -> Router {
    let path = ctx.session.callback_path().to_string();
    Router::new()
        .route(&path, get(handle_callback))
        .with_state(ctx)
}

/// Handle the provider redirect
async fn handle_callback(
    State(ctx): State<Arc<CallbackContext>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let claimed = ctx.tx.lock().take();
    let Some(tx) = claimed else {
        warn!("Ignoring repeated callback request");
        return (StatusCode::CONFLICT, "callback already handled").into_response();
    };

    let state_matches = params
        .state
        .as_deref()
        .is_some_and(|s| s.as_bytes().ct_eq(ctx.session.nonce().as_bytes()).into());
    if !state_matches {
        warn!("Callback state does not match the session");
        ctx.session.transition(SessionState::Failed);
        let _ = tx.send(Err(Error::CsrfMismatch));
        return StatusCode::BAD_REQUEST.into_response();
    }

    debug!("Callback state verified");
    let result = match (params.error, params.code) {
        (Some(error), _) => {
            let description = params.error_description.unwrap_or_default();
            Err(Error::Exchange(format!(
                "provider returned {error}: {description}"
            )))
        }
        (None, Some(code)) if !code.is_empty() => {
            ctx.remote
                .login(&code, Some(ctx.redirect_url.as_str()), &ctx.role)
                .await
        }
        (None, _) => Err(Error::InvalidRequest(
            "callback carried no authorization code".to_string(),
        )),
    };

    let failure = result.as_ref().err().map(ToString::to_string);
    if tx.send(result).is_err() {
        warn!("Login session ended before the callback completed");
        ctx.session.transition(SessionState::Failed);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "authentication error: login session ended",
        )
            .into_response();
    }

    match failure {
        None => {
            info!("Authentication successful");
            ctx.session.transition(SessionState::Succeeded);
            (StatusCode::OK, "authentication successful").into_response()
        }
        Some(e) => {
            ctx.session.transition(SessionState::Failed);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("authentication error: {e}"),
            )
                .into_response()
        }
    }
}
