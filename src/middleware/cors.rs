//! # CORS Policy
//!
//! One static policy for the whole gateway. Pre-flights are answered locally
//! and never forwarded; actual responses get exactly one
//! `Access-Control-Allow-Origin` and one `Access-Control-Allow-Credentials`,
//! whatever the upstream already put there.

use axum::{
    extract::{Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
            ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
        },
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::config::CorsConfig;
use crate::core::error::{GatewayError, GatewayResult};

const PREFLIGHT_VARY: &str = "Origin, Access-Control-Request-Method, Access-Control-Request-Headers";

/// Immutable CORS policy built from configuration
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: HashSet<String>,
    allowed_methods: Vec<Method>,
    allow_any_header: bool,
    allowed_headers: Vec<HeaderName>,
    allow_credentials: bool,
    max_age: Duration,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> GatewayResult<Self> {
        let allowed_methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_str(&m.to_uppercase())
                    .map_err(|_| GatewayError::config(format!("Invalid CORS method '{}'", m)))
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        let allow_any_header = config.allowed_headers.iter().any(|h| h == "*");
        let allowed_headers = config
            .allowed_headers
            .iter()
            .filter(|h| h.as_str() != "*")
            .map(|h| {
                HeaderName::from_str(h).map_err(|_| GatewayError::config(format!("Invalid CORS header '{}'", h)))
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Self {
            allowed_origins: config.allowed_origins.iter().cloned().collect(),
            allowed_methods,
            allow_any_header,
            allowed_headers,
            allow_credentials: config.allow_credentials,
            max_age: config.max_age,
        })
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin)
    }

    /// `OPTIONS` carrying both `Origin` and `Access-Control-Request-Method`
    pub fn is_preflight(method: &Method, headers: &HeaderMap) -> bool {
        method == Method::OPTIONS
            && headers.contains_key(ORIGIN)
            && headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    }

    /// Answer a pre-flight locally. Always `200`; the allow headers are only
    /// present when both origin and requested method pass the policy.
    pub fn preflight(&self, request_headers: &HeaderMap) -> Response {
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(VARY, HeaderValue::from_static(PREFLIGHT_VARY));

        let origin = match request_headers.get(ORIGIN) {
            Some(origin) if origin.to_str().map(|o| self.is_origin_allowed(o)).unwrap_or(false) => origin,
            _ => return response,
        };
        let method_allowed = request_headers
            .get(ACCESS_CONTROL_REQUEST_METHOD)
            .and_then(|m| m.to_str().ok())
            .and_then(|m| Method::from_str(m.trim()).ok())
            .map(|m| self.allowed_methods.contains(&m))
            .unwrap_or(false);
        if !method_allowed {
            return response;
        }

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        if let Ok(methods) = HeaderValue::from_str(
            &self
                .allowed_methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(","),
        ) {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, methods);
        }
        if let Some(allow_headers) = self.preflight_allow_headers(request_headers.get(ACCESS_CONTROL_REQUEST_HEADERS)) {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        }
        if self.allow_credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age.as_secs()));

        response
    }

    fn preflight_allow_headers(&self, requested: Option<&HeaderValue>) -> Option<HeaderValue> {
        let requested = requested.and_then(|r| r.to_str().ok()).unwrap_or("");
        let requested: Vec<&str> = requested.split(',').map(str::trim).filter(|h| !h.is_empty()).collect();

        let allowed: Vec<String> = if self.allow_any_header {
            requested.iter().map(|h| h.to_ascii_lowercase()).collect()
        } else if requested.is_empty() {
            self.allowed_headers.iter().map(|h| h.as_str().to_string()).collect()
        } else {
            requested
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .filter(|h| self.allowed_headers.iter().any(|a| a.as_str() == h))
                .collect()
        };

        if allowed.is_empty() {
            None
        } else {
            HeaderValue::from_str(&allowed.join(",")).ok()
        }
    }

    /// Decorate an actual (non pre-flight) response so the client sees exactly
    /// one value per allow header.
    pub fn apply(&self, request_origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        match request_origin {
            Some(origin) if origin.to_str().map(|o| self.is_origin_allowed(o)).unwrap_or(false) => {
                headers.remove(ACCESS_CONTROL_ALLOW_ORIGIN);
                headers.remove(ACCESS_CONTROL_ALLOW_CREDENTIALS);
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                if self.allow_credentials {
                    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
                }
                add_vary_origin(headers);
            }
            Some(origin) => {
                debug!(origin = ?origin, "Origin not allowed, stripping CORS headers");
                headers.remove(ACCESS_CONTROL_ALLOW_ORIGIN);
                headers.remove(ACCESS_CONTROL_ALLOW_CREDENTIALS);
            }
            None => {
                dedupe_keep_first(headers, &ACCESS_CONTROL_ALLOW_ORIGIN);
                dedupe_keep_first(headers, &ACCESS_CONTROL_ALLOW_CREDENTIALS);
            }
        }
    }
}

/// Collapse repeated values of `name` to the first one
pub fn dedupe_keep_first(headers: &mut HeaderMap, name: &HeaderName) {
    if let Some(first) = headers.get(name).cloned() {
        headers.insert(name.clone(), first);
    }
}

fn add_vary_origin(headers: &mut HeaderMap) {
    let present = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| {
            let v = v.trim();
            v == "*" || v.eq_ignore_ascii_case("origin")
        });
    if !present {
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}

/// Axum middleware applying the policy to every path
pub async fn cors_middleware(State(policy): State<Arc<CorsPolicy>>, request: Request, next: Next) -> Response {
    if CorsPolicy::is_preflight(request.method(), request.headers()) {
        debug!(path = %request.uri().path(), "Answering CORS pre-flight");
        return policy.preflight(request.headers());
    }

    let origin = request.headers().get(ORIGIN).cloned();
    let mut response = next.run(request).await;
    policy.apply(origin.as_ref(), response.headers_mut());
    response
}
