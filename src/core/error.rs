//! # Error Handling Module
//!
//! Every failure the gateway can produce is a variant of [`GatewayError`]. Each
//! variant maps to exactly one client-facing status code, so a failure is never
//! swallowed: it either stops startup or becomes the response for the request
//! that caused it.
//!
//! ## Status mapping
//!
//! | Variant                   | Status |
//! |---------------------------|--------|
//! | `Authentication`          | 401    |
//! | `Login`                   | 401    |
//! | `InteractiveAuthRequired` | 302    |
//! | `RouteNotFound`           | 404    |
//! | `PayloadTooLarge`         | 413    |
//! | `UpstreamUnavailable`     | 502    |
//! | `UpstreamTimeout`         | 504    |
//! | everything else           | 500    |
//!
//! API-chain rejections are rendered as a bare `401` with a
//! `WWW-Authenticate: Bearer` challenge and no body: machine clients get a flat
//! status, never a redirect or an HTML page.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the gateway
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Invalid or incomplete configuration, detected at startup
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Missing, malformed, expired or untrusted bearer credential
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// Unauthenticated browser request that must go through the login flow
    #[error("Interactive authentication required")]
    InteractiveAuthRequired { location: String },

    /// The OAuth2 login callback could not be completed
    #[error("Login failed: {reason}")]
    Login { reason: String },

    /// No route predicate matched the request path
    #[error("No route matches path: {path}")]
    RouteNotFound { path: String },

    /// Upstream could not be reached or broke the connection
    #[error("Upstream '{route}' unavailable: {reason}")]
    UpstreamUnavailable { route: String, reason: String },

    /// Upstream did not answer within the configured timeout
    #[error("Upstream '{route}' timed out after {timeout_ms}ms")]
    UpstreamTimeout { route: String, timeout_ms: u64 },

    /// Inbound body exceeds `server.max_request_size`
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// HTTP client errors outside the forwarding path (key discovery)
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create a login error with a custom reason
    pub fn login<S: Into<String>>(reason: S) -> Self {
        Self::Login {
            reason: reason.into(),
        }
    }

    /// Create a route-not-found error for the given path
    pub fn route_not_found<S: Into<String>>(path: S) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create an upstream-unavailable error
    pub fn upstream_unavailable<R: Into<String>, S: Into<String>>(route: R, reason: S) -> Self {
        Self::UpstreamUnavailable {
            route: route.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code returned to the client for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Login { .. } => StatusCode::UNAUTHORIZED,
            Self::InteractiveAuthRequired { .. } => StatusCode::FOUND,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Authentication { .. } => "authentication_error",
            Self::InteractiveAuthRequired { .. } => "interactive_auth_required",
            Self::Login { .. } => "login_error",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Internal { .. } => "internal_error",
            Self::HttpClient { .. } => "http_client_error",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// Convert errors into HTTP responses.
///
/// Credential failures become a bare challenge, the login redirect becomes a
/// `302`, everything else a small JSON document.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            Self::Authentication { .. } => (
                status,
                [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
            )
                .into_response(),
            Self::InteractiveAuthRequired { location } => {
                match HeaderValue::from_str(&location) {
                    Ok(location) => (status, [(header::LOCATION, location)]).into_response(),
                    Err(_) => StatusCode::UNAUTHORIZED.into_response(),
                }
            }
            other => {
                let error_response = json!({
                    "error": {
                        "code": status.as_u16(),
                        "message": other.to_string(),
                        "type": other.error_type(),
                    }
                });
                (status, Json(error_response)).into_response()
            }
        }
    }
}
