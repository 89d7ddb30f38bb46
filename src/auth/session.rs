//! # Session Store
//!
//! Server-side state for the UI chain: authenticated browser sessions keyed by
//! an opaque cookie value, and pending OAuth2 logins keyed by their `state`
//! parameter. Both live in memory and vanish on restart; the API chain never
//! touches this module.

use axum::http::{header, HeaderMap, HeaderValue};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::config::SessionConfig;
use crate::core::types::{CredentialSource, Identity};

/// How long a started login may take before its `state` is discarded
pub const PENDING_LOGIN_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct Session {
    identity: Identity,
    expires_at: Instant,
}

/// A login that redirected to the provider and awaits its callback
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub registration_id: String,
    pub pkce_verifier: String,
    pub return_to: String,
    created_at: Instant,
}

/// In-memory session and pending-login store
pub struct SessionStore {
    config: SessionConfig,
    sessions: DashMap<String, Session>,
    pending: DashMap<String, PendingLogin>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Store an authenticated identity and return the new session id.
    ///
    /// The session ends at the configured TTL or the credential's own expiry,
    /// whichever comes first.
    pub fn create(&self, identity: Identity) -> String {
        let mut lifetime = self.config.ttl;
        if let Some(exp) = identity.expires_at {
            let remaining = (exp - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            lifetime = lifetime.min(remaining);
        }

        let id = random_token();
        self.sessions.insert(
            id.clone(),
            Session {
                identity: identity.with_source(CredentialSource::Session),
                expires_at: Instant::now() + lifetime,
            },
        );
        id
    }

    /// Look up a live session; expired entries are dropped on access
    pub fn get(&self, id: &str) -> Option<Identity> {
        let identity = {
            let session = self.sessions.get(id)?;
            if session.expires_at > Instant::now() {
                Some(session.identity.clone())
            } else {
                None
            }
        };
        if identity.is_none() {
            self.sessions.remove(id);
        }
        identity
    }

    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// Record a login in progress under its CSRF `state`.
    ///
    /// At most `max_pending_logins` are held; stale entries go first, then the
    /// oldest live one.
    pub fn begin_login(&self, state: &str, registration_id: &str, pkce_verifier: String, return_to: String) {
        let limit = self.config.max_pending_logins.max(1);
        if self.pending.len() >= limit {
            self.pending.retain(|_, pending| pending.created_at.elapsed() < PENDING_LOGIN_TTL);
        }
        while self.pending.len() >= limit {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.pending.remove(&key);
                    debug!(limit, "Pending login limit reached, evicted oldest");
                }
                None => break,
            }
        }

        self.pending.insert(
            state.to_string(),
            PendingLogin {
                registration_id: registration_id.to_string(),
                pkce_verifier,
                return_to,
                created_at: Instant::now(),
            },
        );
    }

    /// Consume a pending login; each `state` is usable once
    pub fn complete_login(&self, state: &str) -> Option<PendingLogin> {
        let (_, pending) = self.pending.remove(state)?;
        if pending.created_at.elapsed() < PENDING_LOGIN_TTL {
            Some(pending)
        } else {
            None
        }
    }

    /// Drop expired sessions and stale pending logins; returns how many went
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len() + self.pending.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        self.pending.retain(|_, pending| pending.created_at.elapsed() < PENDING_LOGIN_TTL);
        before.saturating_sub(self.sessions.len() + self.pending.len())
    }

    /// Run [`purge_expired`](Self::purge_expired) on a fixed interval
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged expired sessions");
                }
            }
        })
    }

    /// Session id from the request's `Cookie` header(s)
    pub fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        let prefix = format!("{}=", self.config.cookie_name);
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .map(str::trim)
            .find_map(|cookie| cookie.strip_prefix(&prefix))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// `Set-Cookie` value carrying a session id
    pub fn session_cookie(&self, id: &str) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.config.cookie_name,
            id,
            self.config.ttl.as_secs()
        );
        if self.config.secure_cookie {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }

    /// `Set-Cookie` value that deletes the session cookie
    pub fn clear_cookie(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.config.cookie_name
        ))
        .ok()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Logins started but not yet completed
    pub fn pending_logins(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// 256 bits from the thread RNG, URL-safe
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
