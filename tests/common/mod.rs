//! Shared fixtures for the gateway integration tests.
#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use chrono::Utc;
use fittracker_gateway::core::config::{GatewayConfig, JwtConfig, RouteDefinition};
use fittracker_gateway::routing::RouteFilter;
use fittracker_gateway::GatewayServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

pub const SECRET: &str = "integration-test-secret";
pub const UI_ORIGIN: &str = "http://localhost:4200";

/// Route definition stripping one segment, pointed at `backend`
pub fn route(id: &str, predicate: &str, backend: &str) -> RouteDefinition {
    RouteDefinition {
        id: id.to_string(),
        predicate: predicate.to_string(),
        uri: backend.to_string(),
        filters: vec![RouteFilter::StripPrefix(1)],
    }
}

/// Gateway with the users and workouts routes, HS256 trust and the UI origin allowed
pub fn config(backend: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.routes = vec![
        route("users", "/api/users/**", backend),
        route("workouts", "/api/workouts/**", backend),
    ];
    config.cors.allowed_origins = vec![UI_ORIGIN.to_string()];
    config.security.jwt = JwtConfig {
        secret: Some(SECRET.to_string()),
        ..JwtConfig::default()
    };
    config
}

pub fn server(config: GatewayConfig) -> TestServer {
    let gateway = GatewayServer::new(config).unwrap();
    TestServer::new(gateway.router()).unwrap()
}

/// HS256 token for `sub`, expiring `exp_offset` seconds from now
pub fn token(sub: &str, exp_offset: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": sub, "exp": Utc::now().timestamp() + exp_offset }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        axum::http::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}
