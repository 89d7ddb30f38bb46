//! # Authentication Middleware
//!
//! Runs the security chains as the outermost layer of the gateway router, so
//! no request reaches CORS handling, local endpoints or an upstream without a
//! decision.
//!
//! ## Rust Concepts Used
//!
//! - `axum::middleware::from_fn_with_state` wraps a plain async fn as a layer
//! - The identity is handed downstream through request extensions

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::chain::{AuthOutcome, SecurityChains};
use crate::core::error::GatewayError;

/// Axum middleware function for authentication
pub async fn auth_middleware(
    State(chains): State<Arc<SecurityChains>>,
    mut request: Request,
    next: Next,
) -> Response {
    let outcome = chains
        .evaluate(request.method(), request.uri(), request.headers())
        .await;

    match outcome {
        AuthOutcome::Authorized(identity) => {
            debug!(
                path = %request.uri().path(),
                source = %identity.source,
                subject = %identity.subject,
                "Request authorized"
            );
            request.extensions_mut().insert(Arc::new(identity));
            next.run(request).await
        }
        AuthOutcome::Rejected(err) => {
            warn!(
                method = %request.method(),
                path = %request.uri().path(),
                error = %err,
                "Authentication failed"
            );
            // Key-fetch and other provider failures still answer with the bearer challenge
            match err {
                err @ GatewayError::Authentication { .. } => err.into_response(),
                other => GatewayError::auth(other.to_string()).into_response(),
            }
        }
        AuthOutcome::LoginRedirect(location) => {
            debug!(path = %request.uri().path(), location = %location, "Redirecting to login");
            GatewayError::InteractiveAuthRequired { location }.into_response()
        }
    }
}
