//! # Security Chain Tests
//!
//! API chain rejections, pre-flight exemptions, remote key material and the
//! interactive login flow of the UI chain.

mod common;

use axum::http::{header, HeaderValue, Method, StatusCode};
use chrono::Utc;
use fittracker_gateway::core::config::{JwtConfig, OAuth2LoginConfig};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bearer, config, server, token};

/// Secret whose standard and URL-safe base64 forms are identical
const JWKS_SECRET: &str = "jwks-test-secret-0123456789abc";
const JWKS_SECRET_B64: &str = "andrcy10ZXN0LXNlY3JldC0wMTIzNDU2Nzg5YWJj";

fn jwks_token(kid: &str, issuer: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    let mut claims = json!({ "sub": "u7", "exp": Utc::now().timestamp() + 300 });
    if let Some(issuer) = issuer {
        claims["iss"] = json!(issuer);
    }
    encode(&header, &claims, &EncodingKey::from_secret(JWKS_SECRET.as_bytes())).unwrap()
}

async fn mount_jwks(mock: &MockServer, expected_fetches: u64) {
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [{ "kty": "oct", "kid": "k1", "alg": "HS256", "k": JWKS_SECRET_B64 }]
        })))
        .expect(expected_fetches)
        .mount(mock)
        .await;
}

async fn mount_ping(mock: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/users/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(mock)
        .await;
}

fn login_config(idp: &str) -> OAuth2LoginConfig {
    OAuth2LoginConfig {
        registration_id: "keycloak".to_string(),
        client_id: "fittracker-ui".to_string(),
        client_secret: Some("ui-secret".to_string()),
        authorization_uri: format!("{}/auth", idp),
        token_uri: format!("{}/token", idp),
        redirect_uri: "http://localhost:8080/login/oauth2/code/keycloak".to_string(),
        scopes: vec!["openid".to_string()],
    }
}

fn set_cookie_value(response: &axum_test::TestResponse) -> String {
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn test_api_without_token_is_bare_401() {
    let backend = MockServer::start().await;
    let server = server(config(&backend.uri()));

    let response = server.get("/api/users/42").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    assert!(response.headers().get(header::LOCATION).is_none());
    assert!(response.text().is_empty());
}

#[tokio::test]
async fn test_api_with_other_scheme_is_401() {
    let backend = MockServer::start().await;
    let server = server(config(&backend.uri()));

    let response = server
        .get("/api/users/42")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_rejects_token_from_wrong_key() {
    let backend = MockServer::start().await;
    let server = server(config(&backend.uri()));

    let forged = encode(
        &Header::default(),
        &json!({ "sub": "u1", "exp": Utc::now().timestamp() + 300 }),
        &EncodingKey::from_secret(b"somebody-else"),
    )
    .unwrap();
    let (name, value) = bearer(&forged);
    let response = server.get("/api/users/42").add_header(name, value).await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_login_redirect_never_used() {
    let idp = MockServer::start().await;
    let mut config = config(&idp.uri());
    config.security.oauth2_login = Some(login_config(&idp.uri()));
    let server = server(config);

    let response = server.get("/api/workouts").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::LOCATION).is_none());
}

#[tokio::test]
async fn test_options_is_never_rejected() {
    let backend = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&backend)
        .await;
    let server = server(config(&backend.uri()));

    for path in ["/api/users/1", "/api/unrouted", "/dashboard"] {
        let response = server.method(Method::OPTIONS, path).await;
        assert_ne!(response.status_code(), StatusCode::UNAUTHORIZED, "OPTIONS {}", path);
    }
}

#[tokio::test]
async fn test_ui_chain_without_login_client_is_401() {
    let backend = MockServer::start().await;
    let server = server(config(&backend.uri()));

    let response = server.get("/dashboard").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ui_chain_accepts_bearer() {
    let backend = MockServer::start().await;
    let server = server(config(&backend.uri()));

    let (name, value) = bearer(&token("u1", 300));
    let response = server.get("/dashboard").add_header(name, value).await;

    // Authorized, then no route matched
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ui_chain_redirects_to_login() {
    let idp = MockServer::start().await;
    let mut config = config(&idp.uri());
    config.security.oauth2_login = Some(login_config(&idp.uri()));
    let server = server(config);

    let response = server.get("/dashboard").await;

    response.assert_status(StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/oauth2/authorization/keycloak?return_to=%2Fdashboard"
    );
}

#[tokio::test]
async fn test_login_flow_creates_session() {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token("u9", 300),
            "token_type": "Bearer",
            "expires_in": 300
        })))
        .expect(1)
        .mount(&idp)
        .await;

    let mut config = config(&idp.uri());
    config.security.oauth2_login = Some(login_config(&idp.uri()));
    let server = server(config);

    // Start: the gateway redirects to the provider with state and PKCE challenge
    let response = server.get("/oauth2/authorization/keycloak?return_to=%2Fdashboard").await;
    response.assert_status(StatusCode::FOUND);
    let location = Url::parse(response.headers()[header::LOCATION].to_str().unwrap()).unwrap();
    assert_eq!(location.path(), "/auth");
    let params: std::collections::HashMap<_, _> = location.query_pairs().into_owned().collect();
    assert_eq!(params["client_id"], "fittracker-ui");
    assert_eq!(params["code_challenge_method"], "S256");
    let state = params["state"].clone();

    // Callback: code exchange, session cookie, back to where the user started
    let callback = format!("/login/oauth2/code/keycloak?code=abc&state={}", state);
    let response = server.get(&callback).await;
    response.assert_status(StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/dashboard");
    let cookie = set_cookie_value(&response);
    assert!(cookie.starts_with("GATEWAY_SESSION="));
    assert!(response.headers()[header::SET_COOKIE].to_str().unwrap().contains("HttpOnly"));

    // The session authorizes UI requests
    let response = server
        .get("/dashboard")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    // A state is single use
    let response = server.get(&callback).await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    // Logout ends the session
    let response = server
        .post("/logout")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await;
    response.assert_status(StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");

    let response = server
        .get("/dashboard")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await;
    response.assert_status(StatusCode::FOUND);
}

#[tokio::test]
async fn test_login_callback_with_unknown_state_is_401() {
    let idp = MockServer::start().await;
    let mut config = config(&idp.uri());
    config.security.oauth2_login = Some(login_config(&idp.uri()));
    let server = server(config);

    let response = server.get("/login/oauth2/code/keycloak?code=abc&state=forged").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(idp.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_jwks_keys_validate_tokens() {
    let mock = MockServer::start().await;
    mount_jwks(&mock, 1).await;
    mount_ping(&mock).await;

    let mut config = config(&mock.uri());
    config.security.jwt = JwtConfig {
        jwk_set_uri: Some(format!("{}/jwks", mock.uri())),
        algorithms: vec!["HS256".to_string()],
        ..JwtConfig::default()
    };
    let server = server(config);

    let (name, value) = bearer(&jwks_token("k1", None));
    let response = server.get("/api/users/ping").add_header(name, value).await;
    response.assert_status_ok();

    // Unknown kid right after a fetch does not hit the key endpoint again
    let (name, value) = bearer(&jwks_token("k2", None));
    let response = server.get("/api/users/ping").add_header(name, value).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_issuer_discovery() {
    let mock = MockServer::start().await;
    let issuer = format!("{}/realms/fittracker", mock.uri());
    Mock::given(method("GET"))
        .and(path("/realms/fittracker/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "jwks_uri": format!("{}/jwks", mock.uri()),
        })))
        .expect(1)
        .mount(&mock)
        .await;
    mount_jwks(&mock, 1).await;
    mount_ping(&mock).await;

    let mut config = config(&mock.uri());
    config.security.jwt = JwtConfig {
        issuer_uri: Some(issuer.clone()),
        algorithms: vec!["HS256".to_string()],
        ..JwtConfig::default()
    };
    let server = server(config);

    let (name, value) = bearer(&jwks_token("k1", Some(&issuer)));
    let response = server.get("/api/users/ping").add_header(name, value).await;
    response.assert_status_ok();

    let (name, value) = bearer(&jwks_token("k1", Some("http://someone-else")));
    let response = server.get("/api/users/ping").add_header(name, value).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unreachable_key_endpoint_is_401() {
    let backend = MockServer::start().await;

    let mut config = config(&backend.uri());
    config.security.jwt = JwtConfig {
        jwk_set_uri: Some("http://127.0.0.1:1/jwks".to_string()),
        algorithms: vec!["HS256".to_string()],
        ..JwtConfig::default()
    };
    let server = server(config);

    let (name, value) = bearer(&jwks_token("k1", None));
    let response = server.get("/api/users/ping").add_header(name, value).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}
