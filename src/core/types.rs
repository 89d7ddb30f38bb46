//! # Core Types
//!
//! Request-scoped values produced by the authentication chains and consumed by
//! the forwarding handler and request logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How the caller proved who they are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Exempt request (pre-flight, permit-all path, login flow)
    Anonymous,
    /// `Authorization: Bearer` token
    Bearer,
    /// Server-side session established by the login flow
    Session,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Anonymous => write!(f, "anonymous"),
            CredentialSource::Bearer => write!(f, "bearer"),
            CredentialSource::Session => write!(f, "session"),
        }
    }
}

/// Authenticated principal attached to the request extensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Token subject (`sub`); empty for anonymous requests
    pub subject: String,

    /// Token issuer (`iss`)
    pub issuer: Option<String>,

    /// Token expiry (`exp`)
    pub expires_at: Option<DateTime<Utc>>,

    /// Space-separated `scope` claim, split
    pub scopes: Vec<String>,

    /// Every other claim, untouched
    pub claims: HashMap<String, serde_json::Value>,

    /// Credential the identity was derived from
    pub source: CredentialSource,
}

impl Identity {
    /// Identity for requests that pass without credentials
    pub fn anonymous() -> Self {
        Self {
            subject: String::new(),
            issuer: None,
            expires_at: None,
            scopes: Vec::new(),
            claims: HashMap::new(),
            source: CredentialSource::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.source == CredentialSource::Anonymous
    }

    /// Same principal, re-labelled with a different credential source
    pub fn with_source(mut self, source: CredentialSource) -> Self {
        self.source = source;
        self
    }

    /// True once `expires_at` has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}
