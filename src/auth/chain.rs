//! # Security Chains
//!
//! Every request is classified into exactly one of two authentication chains
//! before routing:
//!
//! - **API chain** (`/api/**` by default): stateless. A valid bearer token is
//!   required and failures are a bare `401`.
//! - **UI chain** (everything else): a session cookie or a bearer token is
//!   accepted; unauthenticated browsers are sent through the login flow.
//!
//! Exemptions (`OPTIONS`, permit-all paths) are checked once, before chain
//! selection, and apply to both chains.

use axum::http::{header, HeaderMap, Method, Uri};
use std::sync::Arc;
use tracing::debug;

use crate::auth::providers::{bearer_token, AuthProvider};
use crate::auth::session::SessionStore;
use crate::core::config::SecurityConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Identity;
use crate::routing::predicate::{any_matches, PathPattern};

/// Which chain handles a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Api,
    Ui,
}

/// Terminal decision for one request
#[derive(Debug)]
pub enum AuthOutcome {
    /// Continue with this identity (anonymous for exempt requests)
    Authorized(Identity),
    /// Stop with a `401`
    Rejected(GatewayError),
    /// Stop with a `302` to the login entry point
    LoginRedirect(String),
}

/// Ordered chain list plus the exemptions shared by both chains
pub struct SecurityChains {
    permit_paths: Vec<PathPattern>,
    login_paths: Vec<PathPattern>,
    chains: Vec<(PathPattern, ChainKind)>,
    provider: Arc<dyn AuthProvider>,
    sessions: Arc<SessionStore>,
    login_entry: Option<String>,
}

impl SecurityChains {
    pub fn new(
        config: &SecurityConfig,
        provider: Arc<dyn AuthProvider>,
        sessions: Arc<SessionStore>,
    ) -> GatewayResult<Self> {
        let mut chains = parse_all(&config.api_paths)?
            .into_iter()
            .map(|pattern| (pattern, ChainKind::Api))
            .collect::<Vec<_>>();
        chains.push((PathPattern::parse("/**")?, ChainKind::Ui));

        let login_entry = config
            .oauth2_login
            .as_ref()
            .map(|login| format!("/oauth2/authorization/{}", login.registration_id));

        Ok(Self {
            permit_paths: parse_all(&config.permit_paths)?,
            login_paths: parse_all(&config.login_paths)?,
            chains,
            provider,
            sessions,
            login_entry,
        })
    }

    /// Pre-flights and permit-all paths skip authentication entirely
    pub fn is_exempt(&self, method: &Method, path: &str) -> bool {
        method == Method::OPTIONS || any_matches(&self.permit_paths, path)
    }

    /// First chain whose pattern matches; the list ends in a catch-all UI entry
    pub fn select(&self, path: &str) -> ChainKind {
        self.chains
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, kind)| *kind)
            .unwrap_or(ChainKind::Ui)
    }

    /// Run the chain state machine for one request
    pub async fn evaluate(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> AuthOutcome {
        let path = uri.path();
        if self.is_exempt(method, path) {
            return AuthOutcome::Authorized(Identity::anonymous());
        }

        let chain = self.select(path);
        debug!(path, ?chain, "Selected security chain");

        match chain {
            ChainKind::Api => match self.bearer(headers).await {
                Some(Ok(identity)) => AuthOutcome::Authorized(identity),
                Some(Err(e)) => AuthOutcome::Rejected(e),
                None => AuthOutcome::Rejected(GatewayError::auth("Missing bearer token")),
            },
            ChainKind::Ui => self.evaluate_ui(uri, headers).await,
        }
    }

    async fn evaluate_ui(&self, uri: &Uri, headers: &HeaderMap) -> AuthOutcome {
        if let Some(identity) = self
            .sessions
            .session_id(headers)
            .and_then(|id| self.sessions.get(&id))
        {
            return AuthOutcome::Authorized(identity);
        }

        match self.bearer(headers).await {
            Some(Ok(identity)) => return AuthOutcome::Authorized(identity),
            Some(Err(e)) => return AuthOutcome::Rejected(e),
            None => {}
        }

        if any_matches(&self.login_paths, uri.path()) {
            return AuthOutcome::Authorized(Identity::anonymous());
        }

        match &self.login_entry {
            Some(entry) => AuthOutcome::LoginRedirect(login_redirect(entry, uri)),
            None => AuthOutcome::Rejected(GatewayError::auth("No session and no login client configured")),
        }
    }

    /// `None` when no bearer credential was presented
    async fn bearer(&self, headers: &HeaderMap) -> Option<GatewayResult<Identity>> {
        let value = headers.get(header::AUTHORIZATION)?;
        let token = match value.to_str().ok().and_then(bearer_token) {
            Some(token) => token,
            None => return Some(Err(GatewayError::auth("Malformed Authorization header"))),
        };
        Some(self.provider.authenticate(token).await)
    }
}

fn parse_all(patterns: &[String]) -> GatewayResult<Vec<PathPattern>> {
    patterns.iter().map(|p| PathPattern::parse(p)).collect()
}

fn login_redirect(entry: &str, uri: &Uri) -> String {
    let return_to = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{}?return_to={}", entry, urlencoding::encode(return_to))
}
