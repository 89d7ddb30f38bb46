//! # Interactive Login
//!
//! OAuth2 authorization-code flow with PKCE for the UI chain. The gateway acts
//! as the confidential client: it redirects the browser to the provider, takes
//! the code on the callback, exchanges it and turns the validated access token
//! into a server-side session.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::providers::AuthProvider;
use crate::auth::session::SessionStore;
use crate::core::config::OAuth2LoginConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// Configured OAuth2 client plus what it needs to finish a login
pub struct LoginClient {
    registration_id: String,
    scopes: Vec<String>,
    client: BasicClient,
    provider: Arc<dyn AuthProvider>,
    sessions: Arc<SessionStore>,
}

impl LoginClient {
    pub fn new(
        config: &OAuth2LoginConfig,
        provider: Arc<dyn AuthProvider>,
        sessions: Arc<SessionStore>,
    ) -> GatewayResult<Self> {
        let invalid = |field: &str, e: oauth2::url::ParseError| {
            GatewayError::config(format!("security.oauth2_login.{} is invalid: {}", field, e))
        };

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            config.client_secret.clone().map(ClientSecret::new),
            AuthUrl::new(config.authorization_uri.clone()).map_err(|e| invalid("authorization_uri", e))?,
            Some(TokenUrl::new(config.token_uri.clone()).map_err(|e| invalid("token_uri", e))?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_uri.clone()).map_err(|e| invalid("redirect_uri", e))?);

        Ok(Self {
            registration_id: config.registration_id.clone(),
            scopes: config.scopes.clone(),
            client,
            provider,
            sessions,
        })
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Local login endpoints, mounted ahead of the forwarding fallback
    pub fn routes<S>(self: Arc<Self>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route("/oauth2/authorization/:registration", get(authorize))
            .route("/login/oauth2/code/:registration", get(callback))
            .route("/logout", post(logout))
            .with_state(self)
    }

    fn check_registration(&self, registration: &str) -> GatewayResult<()> {
        if registration == self.registration_id {
            Ok(())
        } else {
            Err(GatewayError::route_not_found(format!(
                "/oauth2/authorization/{}",
                registration
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Start a login: remember state and PKCE verifier, send the browser to the provider
async fn authorize(
    State(login): State<Arc<LoginClient>>,
    Path(registration): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, GatewayError> {
    login.check_registration(&registration)?;

    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, state) = login
        .client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(login.scopes.iter().cloned().map(Scope::new))
        .set_pkce_challenge(challenge)
        .url();

    let return_to = safe_return_path(params.return_to.as_deref());
    login.sessions.begin_login(
        state.secret(),
        &login.registration_id,
        verifier.secret().to_string(),
        return_to,
    );

    Ok(found(url.as_str()))
}

/// Finish a login: consume the state, exchange the code, open a session
async fn callback(
    State(login): State<Arc<LoginClient>>,
    Path(registration): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, GatewayError> {
    login.check_registration(&registration)?;

    if let Some(error) = params.error {
        warn!(registration = %registration, error = %error, "Provider reported login error");
        return Err(GatewayError::login(format!("Provider returned error '{}'", error)));
    }

    let state = params.state.ok_or_else(|| GatewayError::login("Missing state parameter"))?;
    let code = params.code.ok_or_else(|| GatewayError::login("Missing code parameter"))?;

    let pending = login
        .sessions
        .complete_login(&state)
        .filter(|pending| pending.registration_id == login.registration_id)
        .ok_or_else(|| GatewayError::login("Unknown or expired state"))?;

    let token = login
        .client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier))
        .request_async(async_http_client)
        .await
        .map_err(|e| {
            warn!(registration = %registration, error = %e, "Authorization code exchange failed");
            GatewayError::login(format!("Code exchange failed: {}", e))
        })?;

    let identity = login
        .provider
        .authenticate(token.access_token().secret())
        .await
        .map_err(|e| GatewayError::login(format!("Access token rejected: {}", e)))?;

    info!(subject = %identity.subject, registration = %registration, "Login completed");

    let session_id = login.sessions.create(identity);
    let mut response = found(&pending.return_to);
    if let Some(cookie) = login.sessions.session_cookie(&session_id) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// End the session and clear the cookie
async fn logout(State(login): State<Arc<LoginClient>>, headers: HeaderMap) -> Response {
    if let Some(id) = login.sessions.session_id(&headers) {
        login.sessions.remove(&id);
    }

    let mut response = found("/");
    if let Some(cookie) = login.sessions.clear_cookie() {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// Only local absolute paths are followed after login
fn safe_return_path(candidate: Option<&str>) -> String {
    match candidate {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(_) => GatewayError::internal("Redirect target is not a valid header value").into_response(),
    }
}
