//! # Forwarding Engine
//!
//! Sends a resolved request to its upstream origin and relays the answer. The
//! request body is buffered (it was already size-checked); the response body
//! is streamed straight through. Dropping the handler future, which is what
//! happens when the client disconnects, drops the in-flight upstream call.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use bytes::Bytes;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use crate::core::config::TimeoutConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::RouteMatch;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";

/// Inbound request pieces the forwarder needs
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
}

/// HTTP forwarder backed by one pooled `reqwest` client
pub struct HttpForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeouts: &TimeoutConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.upstream_timeout)
            .connect_timeout(timeouts.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build upstream client: {}", e)))?;

        Ok(Self {
            client,
            timeout: timeouts.upstream_timeout,
        })
    }

    /// Forward one request to the matched route's upstream
    pub async fn forward(&self, matched: &RouteMatch, request: ForwardRequest) -> GatewayResult<Response> {
        let route_id = matched.route.id.as_str();
        let headers = upstream_headers(&request.headers, request.client_ip, &matched.rewrite.stripped_prefix);

        debug!(
            route = route_id,
            method = %request.method,
            upstream = %matched.upstream_url,
            "Forwarding request"
        );

        let upstream = self
            .client
            .request(request.method, &matched.upstream_url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| self.classify(route_id, e))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    fn classify(&self, route_id: &str, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout {
                route: route_id.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            GatewayError::upstream_unavailable(route_id, err.to_string())
        }
    }
}

/// Headers that describe one connection and must not cross the proxy
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Remove hop-by-hop headers, including any named in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    let hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in hop {
        headers.remove(name);
    }
}

/// Build the outbound header set from the inbound one
fn upstream_headers(inbound: &HeaderMap, client_ip: Option<IpAddr>, stripped_prefix: &str) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    if let Some(ip) = client_ip {
        let forwarded_for = match inbound.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    if let Some(host) = inbound.get(header::HOST) {
        if !headers.contains_key(X_FORWARDED_HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
    }

    if !stripped_prefix.is_empty() {
        if let Ok(value) = HeaderValue::from_str(stripped_prefix) {
            headers.insert(X_FORWARDED_PREFIX, value);
        }
    }

    headers
}
