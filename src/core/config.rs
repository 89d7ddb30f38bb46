//! # Configuration Module
//!
//! The gateway reads one YAML document at startup. Nothing in it is re-read or
//! mutated afterwards: route table, CORS policy and security chains are built
//! from it once and shared read-only by every request.
//!
//! ## Key Features
//! - YAML parsing with serde, every section optional with sensible defaults
//! - Durations in human-readable form (`10s`, `30m`) via `humantime-serde`
//! - Environment variable overrides (`GATEWAY_<SECTION>_<FIELD>`)
//! - Validation that reports every problem at once instead of the first one
//!
//! ## Example
//! ```yaml
//! routes:
//!   - id: users
//!     predicate: /api/users/**
//!     uri: http://users-service:8081
//!     filters:
//!       - strip_prefix: 1
//! cors:
//!   allowed_origins: ["http://localhost:4200"]
//! security:
//!   jwt:
//!     issuer_uri: http://keycloak:8080/realms/fittracker
//! ```

use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::predicate::PathPattern;
use crate::routing::router::{Route, RouteFilter};
use axum::http::{HeaderName, Method};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and upstream timeouts
    pub server: ServerConfig,

    /// Ordered route definitions; first match wins
    pub routes: Vec<RouteDefinition>,

    /// Global CORS policy
    pub cors: CorsConfig,

    /// Authentication chains and trust material
    pub security: SecurityConfig,

    /// Log level and output format
    pub logging: LoggingConfig,

    /// Locally served health/info endpoints
    pub diagnostics: DiagnosticsConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply env overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without validation
    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(port) = env::var("GATEWAY_SERVER_HTTP_PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_HTTP_PORT: {}", e)))?;
        }

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(timeout) = env::var("GATEWAY_SERVER_UPSTREAM_TIMEOUT") {
            self.server.timeouts.upstream_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SERVER_UPSTREAM_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_LOG_FORMAT '{}', expected json or pretty",
                        other
                    )))
                }
            };
        }

        if let Ok(issuer) = env::var("GATEWAY_JWT_ISSUER_URI") {
            self.security.jwt.issuer_uri = Some(issuer);
        }

        if let Ok(secret) = env::var("GATEWAY_JWT_SECRET") {
            self.security.jwt.secret = Some(secret);
        }

        Ok(())
    }

    /// Validate the whole document, collecting every error found
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }
        if self.server.max_request_size == 0 {
            errors.push("server.max_request_size must be greater than 0".to_string());
        }
        if self.server.timeouts.upstream_timeout.is_zero() {
            errors.push("server.timeouts.upstream_timeout must be greater than 0".to_string());
        }
        if self.server.timeouts.connect_timeout.is_zero() {
            errors.push("server.timeouts.connect_timeout must be greater than 0".to_string());
        }

        let mut seen_ids = HashSet::new();
        for (index, route) in self.routes.iter().enumerate() {
            if route.id.is_empty() {
                errors.push(format!("Route {} has an empty id", index));
            } else if !seen_ids.insert(route.id.as_str()) {
                errors.push(format!("Duplicate route id '{}'", route.id));
            }
            if let Err(e) = Route::new(&route.id, &route.predicate, &route.uri, route.filters.clone()) {
                errors.push(e.to_string());
            }
        }

        for origin in &self.cors.allowed_origins {
            match Url::parse(origin) {
                Ok(url) if url.host_str().is_some() && url.path() == "/" && !origin.ends_with('/') => {}
                _ => errors.push(format!(
                    "cors.allowed_origins entry '{}' must be a bare origin like http://host:port",
                    origin
                )),
            }
        }
        for method in &self.cors.allowed_methods {
            if Method::from_str(method).is_err() {
                errors.push(format!("cors.allowed_methods entry '{}' is not an HTTP method", method));
            }
        }
        for name in &self.cors.allowed_headers {
            if name != "*" && HeaderName::from_str(name).is_err() {
                errors.push(format!("cors.allowed_headers entry '{}' is not a header name", name));
            }
        }

        for (field, patterns) in [
            ("security.api_paths", &self.security.api_paths),
            ("security.permit_paths", &self.security.permit_paths),
            ("security.login_paths", &self.security.login_paths),
        ] {
            for pattern in patterns {
                if let Err(e) = PathPattern::parse(pattern) {
                    errors.push(format!("{}: {}", field, e));
                }
            }
        }

        let jwt = &self.security.jwt;
        if jwt.issuer_uri.is_none() && jwt.jwk_set_uri.is_none() && jwt.secret.is_none() {
            errors.push(
                "security.jwt needs one of issuer_uri, jwk_set_uri or secret to validate bearer tokens"
                    .to_string(),
            );
        }
        for uri in jwt.issuer_uri.iter().chain(jwt.jwk_set_uri.iter()) {
            if Url::parse(uri).is_err() {
                errors.push(format!("security.jwt uri '{}' is not a valid URL", uri));
            }
        }
        let secret_only = jwt.issuer_uri.is_none() && jwt.jwk_set_uri.is_none() && jwt.secret.is_some();
        for algorithm in &jwt.algorithms {
            match Algorithm::from_str(algorithm) {
                Err(_) => errors.push(format!("security.jwt algorithm '{}' is not supported", algorithm)),
                Ok(Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) => {}
                Ok(_) if secret_only => errors.push(format!(
                    "security.jwt algorithm '{}' cannot be verified with a shared secret",
                    algorithm
                )),
                Ok(_) => {}
            }
        }

        if let Some(login) = &self.security.oauth2_login {
            if login.registration_id.is_empty() || login.registration_id.contains('/') {
                errors.push("security.oauth2_login.registration_id must be a single path segment".to_string());
            }
            if login.client_id.is_empty() {
                errors.push("security.oauth2_login.client_id cannot be empty".to_string());
            }
            for (field, uri) in [
                ("authorization_uri", &login.authorization_uri),
                ("token_uri", &login.token_uri),
                ("redirect_uri", &login.redirect_uri),
            ] {
                if Url::parse(uri).is_err() {
                    errors.push(format!("security.oauth2_login.{} '{}' is not a valid URL", field, uri));
                }
            }
        }

        if self.security.session.cookie_name.is_empty() {
            errors.push("security.session.cookie_name cannot be empty".to_string());
        }

        if !self.diagnostics.base_path.starts_with('/') || self.diagnostics.base_path.len() < 2 {
            errors.push("diagnostics.base_path must be an absolute path like /actuator".to_string());
        } else {
            let health = format!("{}/health", self.diagnostics.base_path.trim_end_matches('/'));
            let permitted = self
                .security
                .permit_paths
                .iter()
                .filter_map(|pattern| PathPattern::parse(pattern).ok())
                .any(|pattern| pattern.matches(&health));
            if !permitted {
                errors.push(format!(
                    "security.permit_paths must cover diagnostics.base_path (add '{}/**')",
                    self.diagnostics.base_path.trim_end_matches('/')
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub http_port: u16,

    /// Maximum inbound request body size in bytes
    pub max_request_size: usize,

    /// Timeouts
    pub timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            max_request_size: 10 * 1024 * 1024, // 10MB
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for an upstream exchange
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Time allowed to establish the upstream connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Grace period for in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Route definition as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Unique route id
    pub id: String,

    /// Path predicate, e.g. `/api/users/**`
    pub predicate: String,

    /// Backend origin, e.g. `http://users-service:8081`
    pub uri: String,

    /// Ordered rewrite filters
    #[serde(default)]
    pub filters: Vec<RouteFilter>,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins allowed to make cross-origin calls
    pub allowed_origins: Vec<String>,

    /// Allowed methods
    pub allowed_methods: Vec<String>,

    /// Allowed request headers, or `*`
    pub allowed_headers: Vec<String>,

    /// Emit `Access-Control-Allow-Credentials: true`
    pub allow_credentials: bool,

    /// How long browsers may cache a pre-flight answer
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "DELETE"].iter().map(|m| m.to_string()).collect(),
            allowed_headers: vec!["*".to_string()],
            allow_credentials: true,
            max_age: Duration::from_secs(1800),
        }
    }
}

/// Authentication chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Paths served by the stateless bearer-token chain
    pub api_paths: Vec<String>,

    /// Paths that never require authentication (health, diagnostics)
    pub permit_paths: Vec<String>,

    /// UI-chain paths reachable without a session (login flow)
    pub login_paths: Vec<String>,

    /// Bearer token validation
    pub jwt: JwtConfig,

    /// Interactive OAuth2 login for the UI chain
    pub oauth2_login: Option<OAuth2LoginConfig>,

    /// Session cookie settings
    pub session: SessionConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_paths: vec!["/api/**".to_string()],
            permit_paths: vec!["/actuator/**".to_string()],
            login_paths: vec!["/login/**".to_string(), "/oauth2/**".to_string()],
            jwt: JwtConfig::default(),
            oauth2_login: None,
            session: SessionConfig::default(),
        }
    }
}

/// JWT trust material and validation rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Issuer; also used to discover `jwks_uri` via OpenID metadata
    pub issuer_uri: Option<String>,

    /// Explicit JWK Set location; skips discovery
    pub jwk_set_uri: Option<String>,

    /// Shared HS256 secret for local development and tests
    pub secret: Option<String>,

    /// Accepted audiences; empty disables the audience check
    pub audiences: Vec<String>,

    /// Accepted signing algorithms; empty means HS256 with a shared secret
    /// and RS256 with remote keys
    pub algorithms: Vec<String>,

    /// Clock skew tolerated on `exp` and `nbf`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,

    /// Minimum time between JWK Set refreshes
    #[serde(with = "humantime_serde")]
    pub jwks_refresh_interval: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer_uri: None,
            jwk_set_uri: None,
            secret: None,
            audiences: Vec::new(),
            algorithms: Vec::new(),
            leeway: Duration::from_secs(60),
            jwks_refresh_interval: Duration::from_secs(300),
        }
    }
}

/// OAuth2 authorization-code client used by the UI chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2LoginConfig {
    /// Path segment identifying the provider, e.g. `keycloak`
    #[serde(default = "default_registration_id")]
    pub registration_id: String,

    pub client_id: String,

    #[serde(default)]
    pub client_secret: Option<String>,

    pub authorization_uri: String,

    pub token_uri: String,

    /// Must point at `/login/oauth2/code/{registration_id}` on this gateway
    pub redirect_uri: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_registration_id() -> String {
    "keycloak".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

/// Session cookie settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,

    /// Upper bound on session lifetime; token expiry may end it sooner
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Add the `Secure` attribute to the session cookie
    pub secure_cookie: bool,

    /// Logins awaiting their callback; the oldest is evicted beyond this
    pub max_pending_logins: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "GATEWAY_SESSION".to_string(),
            ttl: Duration::from_secs(30 * 60),
            secure_cookie: false,
            max_pending_logins: 10_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Locally served diagnostics endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub base_path: String,

    /// Serve the read-only route table under `{base_path}/gateway/routes`
    pub expose_routes: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            base_path: "/actuator".to_string(),
            expose_routes: true,
        }
    }
}
