//! # FitTracker Gateway Library
//!
//! Edge gateway for the FitTracker services. One process sits in front of the
//! users, workouts and progress backends and does four things per request:
//!
//! 1. picks an authentication chain by path (stateless bearer tokens for
//!    `/api/**`, interactive sessions for everything else),
//! 2. answers CORS pre-flights and normalizes CORS response headers,
//! 3. matches the path against an ordered route table and strips prefixes,
//! 4. forwards to the upstream and streams the answer back.
//!
//! ## Module Layout
//!
//! - `core`: configuration, error taxonomy and request-scoped types
//! - `routing`: path predicates and the route table
//! - `auth`: security chains, JWT validation, sessions and the login flow
//! - `middleware`: the CORS policy layer
//! - `gateway`: server assembly and the forwarding engine
//! - `observability`: logging setup and diagnostics endpoints

/// Core functionality including error types, configuration, and basic data structures
pub mod core;

/// Main gateway server implementation and HTTP forwarding
pub mod gateway;

/// CORS handling applied to every response
pub mod middleware;

/// Authentication chains and credential providers
pub mod auth;

/// Path predicates and the ordered route table
pub mod routing;

/// Logging and diagnostics endpoints
pub mod observability;

pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use core::types::{CredentialSource, Identity};
pub use gateway::server::GatewayServer;
pub use routing::{Route, RouteTable};
