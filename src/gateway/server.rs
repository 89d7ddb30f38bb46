//! # Gateway Server
//!
//! Assembles the HTTP surface:
//!
//! ```text
//! TraceLayer -> auth_middleware -> cors_middleware -> local endpoints | proxy fallback
//! ```
//!
//! Login, logout and diagnostics handlers are ordinary axum routes; every
//! other path falls through to [`proxy_handler`], which resolves the route
//! table and forwards upstream.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` shares the immutable route table, CORS policy and chains across handlers
//! - `#[derive(Clone)]` on `ServerState` is required by axum's `State` extractor
//! - `tokio::select!` races graceful shutdown against its deadline

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    Router,
};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::{auth_middleware, JwtAuthProvider, LoginClient, SecurityChains, SessionStore};
use crate::auth::providers::AuthProvider;
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::forward::{ForwardRequest, HttpForwarder};
use crate::middleware::cors::{cors_middleware, CorsPolicy};
use crate::observability::health;
use crate::routing::RouteTable;

/// How often expired sessions and stale logins are purged
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state for the forwarding fallback
#[derive(Clone)]
pub struct ServerState {
    pub routes: Arc<RouteTable>,
    pub forwarder: Arc<HttpForwarder>,
    pub max_request_size: usize,
}

/// Main gateway server
pub struct GatewayServer {
    config: GatewayConfig,
    app: Router,
    routes: Arc<RouteTable>,
    sessions: Arc<SessionStore>,
}

impl GatewayServer {
    /// Build every component from validated configuration. No sockets are
    /// opened and no network calls are made.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let routes = Arc::new(RouteTable::from_definitions(&config.routes)?);
        let cors = Arc::new(CorsPolicy::from_config(&config.cors)?);
        let provider: Arc<dyn AuthProvider> = Arc::new(JwtAuthProvider::new(config.security.jwt.clone())?);
        let sessions = Arc::new(SessionStore::new(config.security.session.clone()));
        let chains = Arc::new(SecurityChains::new(
            &config.security,
            Arc::clone(&provider),
            Arc::clone(&sessions),
        )?);
        let forwarder = Arc::new(HttpForwarder::new(&config.server.timeouts)?);

        let state = ServerState {
            routes: Arc::clone(&routes),
            forwarder,
            max_request_size: config.server.max_request_size,
        };

        let mut app: Router<ServerState> =
            Router::new().merge(health::routes(&config.diagnostics, Arc::clone(&routes)));

        if let Some(login_config) = &config.security.oauth2_login {
            let login = Arc::new(LoginClient::new(login_config, provider, Arc::clone(&sessions))?);
            info!(registration = login.registration_id(), "Interactive login enabled");
            app = app.merge(login.routes());
        }

        // Outermost first: trace, authenticate, then CORS
        let app = app.fallback(proxy_handler).with_state(state).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn_with_state(chains, auth_middleware))
                .layer(from_fn_with_state(cors, cors_middleware)),
        );

        info!(routes = ?routes.ids(), "Route table loaded");

        Ok(Self {
            config,
            app,
            routes,
            sessions,
        })
    }

    /// The fully layered router, for embedding or in-process tests
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn route_table(&self) -> Arc<RouteTable> {
        Arc::clone(&self.routes)
    }

    /// Configured listen address
    pub fn bind_addr(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.config.server.bind_address, self.config.server.http_port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests for at
    /// most `server.timeouts.shutdown_timeout`.
    #[instrument(skip(self, shutdown))]
    pub async fn start<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", addr, e)))?;
        info!(%addr, "Gateway HTTP server listening");

        let janitor = self.sessions.spawn_janitor(SESSION_PURGE_INTERVAL);
        let drain_deadline = self.config.server.timeouts.shutdown_timeout;

        let stopping = Arc::new(Notify::new());
        let signal = {
            let stopping = Arc::clone(&stopping);
            async move {
                shutdown.await;
                info!("Shutdown signal received, draining connections");
                stopping.notify_one();
            }
        };

        let server = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .into_future();

        let result = tokio::select! {
            result = server => result.map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e))),
            _ = async {
                stopping.notified().await;
                tokio::time::sleep(drain_deadline).await;
            } => {
                warn!(timeout = ?drain_deadline, "Graceful shutdown timed out, dropping open connections");
                Ok(())
            }
        };

        janitor.abort();
        info!("Gateway HTTP server stopped");
        result
    }
}

/// Fallback handler: resolve the route table and forward upstream
async fn proxy_handler(State(state): State<ServerState>, request: Request) -> Response {
    match proxy(state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn proxy(state: ServerState, request: Request) -> GatewayResult<Response> {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let matched = state.routes.resolve(&path, query.as_deref()).ok_or_else(|| {
        debug!(path = %path, "No route matched");
        GatewayError::route_not_found(&path)
    })?;
    debug!(path = %path, route = %matched.route.id, rewritten = %matched.rewrite.path, "Route matched");

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let declared_length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.map(|len| len > state.max_request_size).unwrap_or(false) {
        return Err(GatewayError::PayloadTooLarge {
            limit: state.max_request_size,
        });
    }

    let (parts, body) = request.into_parts();
    let body = read_body(body, state.max_request_size).await?;

    let result = state
        .forwarder
        .forward(
            &matched,
            ForwardRequest {
                method: parts.method,
                headers: parts.headers,
                body,
                client_ip,
            },
        )
        .await;

    if let Err(err) = &result {
        error!(route = %matched.route.id, upstream = %matched.upstream_url, error = %err, "Upstream call failed");
    }
    result
}

async fn read_body(body: Body, limit: usize) -> GatewayResult<Bytes> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, limit, "Request body rejected");
        GatewayError::PayloadTooLarge { limit }
    })
}
