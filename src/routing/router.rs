//! # Route Table
//!
//! An ordered, immutable list of routes. Each route binds a [`PathPattern`] to a
//! backend origin plus a filter chain that rewrites the path before forwarding.
//!
//! Lookup is a linear, first-match-wins scan in configuration order. A radix
//! tree would lose that ordering guarantee, and route tables for this gateway
//! are a handful of entries long.
//!
//! Paths carrying `.` or `..` segments (literal or percent-encoded) never
//! resolve: the upstream URL parser would collapse them and move the request
//! outside the matched prefix.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<Route>` lets handlers keep a resolved route without borrowing the table
//! - The table is never mutated after construction, so it is shared without locks

use crate::core::config::RouteDefinition;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::predicate::PathPattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Path rewrite operations applied to a matched request, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteFilter {
    /// Remove the first `n` path segments before forwarding
    StripPrefix(usize),
}

impl RouteFilter {
    fn apply(&self, rewrite: &mut RewrittenPath) {
        match *self {
            RouteFilter::StripPrefix(parts) => {
                let (path, stripped) = strip_prefix(&rewrite.path, parts);
                rewrite.path = path;
                if stripped != "/" {
                    rewrite.stripped_prefix.push_str(&stripped);
                }
            }
        }
    }
}

/// Result of running a route's filter chain over an inbound path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenPath {
    /// Path sent upstream
    pub path: String,
    /// Everything removed by `strip_prefix` filters, e.g. `/api`; empty if nothing was removed
    pub stripped_prefix: String,
}

/// Remove the first `parts` segments from `path`.
///
/// Returns the remaining path and the removed prefix. A trailing slash on the
/// inbound path survives unless the result is the root. Stripping more segments
/// than the path has yields `/`.
pub fn strip_prefix(path: &str, parts: usize) -> (String, String) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let cut = parts.min(segments.len());

    let mut rewritten = format!("/{}", segments[cut..].join("/"));
    if rewritten.len() > 1 && path.ends_with('/') {
        rewritten.push('/');
    }
    let stripped = format!("/{}", segments[..cut].join("/"));

    (rewritten, stripped)
}

/// True if `path` has a segment that URL normalisation would collapse.
///
/// Covers `.`, `..` and their percent-encoded spellings (`%2e`, `.%2E`, ...),
/// plus backslashes, which WHATWG parsers treat as `/` for http(s) URLs.
pub fn has_dot_segments(path: &str) -> bool {
    path.contains('\\')
        || path.split('/').any(|segment| {
            let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
            decoded == "." || decoded == ".."
        })
}

/// A single route definition
#[derive(Debug, Clone)]
pub struct Route {
    /// Unique route identifier
    pub id: String,

    /// Path predicate evaluated against the inbound path
    pub predicate: PathPattern,

    /// Backend origin (scheme, host and port)
    pub uri: Url,

    /// Ordered rewrite filters
    pub filters: Vec<RouteFilter>,
}

impl Route {
    /// Build a route, validating the predicate and origin
    pub fn new(id: &str, predicate: &str, uri: &str, filters: Vec<RouteFilter>) -> GatewayResult<Self> {
        let predicate = PathPattern::parse(predicate)?;
        let uri = Url::parse(uri)
            .map_err(|e| GatewayError::config(format!("Route '{}' has invalid uri '{}': {}", id, uri, e)))?;

        if !matches!(uri.scheme(), "http" | "https") {
            return Err(GatewayError::config(format!(
                "Route '{}' uri must use http or https, got '{}'",
                id,
                uri.scheme()
            )));
        }
        if uri.host_str().is_none() {
            return Err(GatewayError::config(format!("Route '{}' uri has no host", id)));
        }

        Ok(Self {
            id: id.to_string(),
            predicate,
            uri,
            filters,
        })
    }

    /// Run the filter chain over `path`
    pub fn rewrite(&self, path: &str) -> RewrittenPath {
        let mut rewrite = RewrittenPath {
            path: path.to_string(),
            stripped_prefix: String::new(),
        };
        for filter in &self.filters {
            filter.apply(&mut rewrite);
        }
        rewrite
    }

    /// Scheme, host and port of the backend, e.g. `http://users:8081`
    pub fn origin(&self) -> String {
        self.uri.origin().ascii_serialization()
    }

    /// Full upstream URL for a rewritten path and optional query string
    pub fn upstream_url(&self, rewritten_path: &str, query: Option<&str>) -> String {
        match query {
            Some(query) if !query.is_empty() => format!("{}{}?{}", self.origin(), rewritten_path, query),
            _ => format!("{}{}", self.origin(), rewritten_path),
        }
    }

    /// Configuration view of this route
    pub fn definition(&self) -> RouteDefinition {
        RouteDefinition {
            id: self.id.clone(),
            predicate: self.predicate.to_string(),
            uri: self.origin(),
            filters: self.filters.clone(),
        }
    }
}

/// A request path resolved against the route table
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route
    pub route: Arc<Route>,
    /// Path after the route's filters ran
    pub rewrite: RewrittenPath,
    /// Complete upstream URL including query string
    pub upstream_url: String,
}

/// Ordered route table; first match wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a table with the fluent API
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::new()
    }

    /// Build the table from configuration, rejecting duplicate ids
    pub fn from_definitions(definitions: &[RouteDefinition]) -> GatewayResult<Self> {
        let mut table = Self::new();
        for definition in definitions {
            table.push(Route::new(
                &definition.id,
                &definition.predicate,
                &definition.uri,
                definition.filters.clone(),
            )?)?;
        }
        Ok(table)
    }

    fn push(&mut self, route: Route) -> GatewayResult<()> {
        if self.routes.iter().any(|existing| existing.id == route.id) {
            return Err(GatewayError::config(format!("Duplicate route id '{}'", route.id)));
        }
        self.routes.push(Arc::new(route));
        Ok(())
    }

    /// First route whose predicate matches `path`, in table order
    pub fn find(&self, path: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.predicate.matches(path))
    }

    /// Match `path` and compute the rewritten upstream target
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Option<RouteMatch> {
        if has_dot_segments(path) {
            return None;
        }
        let route = self.find(path)?;
        let rewrite = route.rewrite(path);
        let upstream_url = route.upstream_url(&rewrite.path, query);

        Some(RouteMatch {
            route: Arc::clone(route),
            rewrite,
            upstream_url,
        })
    }

    /// Routes in evaluation order
    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    /// Route ids, for startup logging
    pub fn ids(&self) -> HashSet<&str> {
        self.routes.iter().map(|route| route.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builder for creating route tables with a fluent API
pub struct RouteTableBuilder {
    table: RouteTable,
    error: Option<GatewayError>,
}

impl RouteTableBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            table: RouteTable::new(),
            error: None,
        }
    }

    /// Append a route with an explicit filter chain
    pub fn route(mut self, id: &str, predicate: &str, uri: &str, filters: Vec<RouteFilter>) -> Self {
        if self.error.is_none() {
            let pushed = Route::new(id, predicate, uri, filters).and_then(|route| self.table.push(route));
            if let Err(e) = pushed {
                self.error = Some(e);
            }
        }
        self
    }

    /// Append a route that strips `parts` leading segments
    pub fn strip_prefix_route(self, id: &str, predicate: &str, uri: &str, parts: usize) -> Self {
        self.route(id, predicate, uri, vec![RouteFilter::StripPrefix(parts)])
    }

    /// Build the table, reporting the first invalid route
    pub fn build(self) -> GatewayResult<RouteTable> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.table),
        }
    }
}

impl Default for RouteTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fittracker_table() -> RouteTable {
        RouteTable::builder()
            .strip_prefix_route("users", "/api/users/**", "http://users:8081", 1)
            .strip_prefix_route("workouts", "/api/workouts/**", "http://workouts:8082", 1)
            .build()
            .unwrap()
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("/api/users/42", 1), ("/users/42".to_string(), "/api".to_string()));
        assert_eq!(strip_prefix("/api/users", 1).0, "/users");
        assert_eq!(strip_prefix("/api/users/", 1).0, "/users/");
        assert_eq!(strip_prefix("/api/users", 2).0, "/");
        assert_eq!(strip_prefix("/api/users", 5).0, "/");
        assert_eq!(strip_prefix("/api/users/42", 0), ("/api/users/42".to_string(), "/".to_string()));
    }

    #[test]
    fn test_first_match_wins() {
        let table = RouteTable::builder()
            .strip_prefix_route("admin-users", "/api/users/admin/**", "http://admin:9000", 2)
            .strip_prefix_route("users", "/api/users/**", "http://users:8081", 1)
            .build()
            .unwrap();

        assert_eq!(table.find("/api/users/admin/1").unwrap().id, "admin-users");
        assert_eq!(table.find("/api/users/1").unwrap().id, "users");
    }

    #[test]
    fn test_resolve_builds_upstream_url() {
        let table = fittracker_table();

        let matched = table.resolve("/api/users/42", None).unwrap();
        assert_eq!(matched.route.id, "users");
        assert_eq!(matched.rewrite.path, "/users/42");
        assert_eq!(matched.rewrite.stripped_prefix, "/api");
        assert_eq!(matched.upstream_url, "http://users:8081/users/42");

        let matched = table.resolve("/api/workouts", Some("from=2024-01-01&to=2024-02-01")).unwrap();
        assert_eq!(
            matched.upstream_url,
            "http://workouts:8082/workouts?from=2024-01-01&to=2024-02-01"
        );
    }

    #[test]
    fn test_no_match() {
        let table = fittracker_table();
        assert!(table.resolve("/api/progress/111/increment", None).is_none());
        assert!(table.resolve("/dashboard", None).is_none());
    }

    #[test]
    fn test_dot_segments_never_resolve() {
        let table = fittracker_table();
        for path in [
            "/api/users/../../admin/secret",
            "/api/users/./42",
            "/api/users/%2e%2e/%2E%2E/admin",
            "/api/users/.%2e/admin",
            "/api/users/..",
            "/api/users/..\\admin",
        ] {
            assert!(table.resolve(path, None).is_none(), "{}", path);
        }

        // Dots inside a segment are ordinary characters
        assert!(table.resolve("/api/users/v1.2/..hidden", None).is_some());
        assert!(table.resolve("/api/users/...", None).is_some());
    }

    #[test]
    fn test_chained_filters_accumulate_prefix() {
        let route = Route::new(
            "nested",
            "/edge/api/users/**",
            "http://users:8081",
            vec![RouteFilter::StripPrefix(1), RouteFilter::StripPrefix(1)],
        )
        .unwrap();

        let rewrite = route.rewrite("/edge/api/users/7");
        assert_eq!(rewrite.path, "/users/7");
        assert_eq!(rewrite.stripped_prefix, "/edge/api");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = RouteTable::builder()
            .strip_prefix_route("users", "/api/users/**", "http://users:8081", 1)
            .strip_prefix_route("users", "/api/people/**", "http://users:8081", 1)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_origin_rejected() {
        assert!(Route::new("users", "/api/users/**", "lb://users-service", vec![]).is_err());
        assert!(Route::new("users", "/api/users/**", "not a url", vec![]).is_err());
    }

    #[test]
    fn test_origin_ignores_uri_path() {
        let route = Route::new("users", "/api/users/**", "http://users:8081/ignored/", vec![]).unwrap();
        assert_eq!(route.origin(), "http://users:8081");
    }

    #[test]
    fn test_filter_serde_shape() {
        let filters: Vec<RouteFilter> = serde_yaml::from_str("- strip_prefix: 1\n").unwrap();
        assert_eq!(filters, vec![RouteFilter::StripPrefix(1)]);
    }
}
