//! Locally served diagnostics: liveness, build info and the read-only route table.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::core::config::{DiagnosticsConfig, RouteDefinition};
use crate::routing::RouteTable;

#[derive(Debug, Serialize)]
struct RoutesView {
    routes: Vec<RouteDefinition>,
}

/// Diagnostics endpoints under `config.base_path`
pub fn routes<S>(config: &DiagnosticsConfig, table: Arc<RouteTable>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let base = config.base_path.trim_end_matches('/');
    let mut router = Router::new()
        .route(&format!("{}/health", base), get(health_check))
        .route(&format!("{}/info", base), get(info));

    if config.expose_routes {
        router = router.route(&format!("{}/gateway/routes", base), get(route_table));
    }

    router.with_state(table)
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "UP" })))
}

pub async fn info() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn route_table(State(table): State<Arc<RouteTable>>) -> impl IntoResponse {
    Json(RoutesView {
        routes: table.routes().map(|route| route.definition()).collect(),
    })
}
