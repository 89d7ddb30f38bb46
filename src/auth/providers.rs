//! # Authentication Providers
//!
//! Bearer-token validation. [`JwtAuthProvider`] verifies signature, expiry and
//! (when configured) issuer and audience, and turns the claims into an
//! [`Identity`].
//!
//! Trust material comes from one of three places:
//! - a static shared secret (HS256/384/512), for local development and tests,
//! - an explicit JWK Set URI,
//! - the issuer's OpenID discovery document, which names the `jwks_uri`.
//!
//! Remote keys are cached. The cache is refreshed when it is older than the
//! configured interval, or when a token names a `kid` the cache has not seen
//! (at most every ten seconds, so garbage `kid`s cannot hammer the issuer).
//! Only one refresh runs at a time; requests that queued behind it reuse its
//! result instead of fetching again.
//!
//! ## Rust Concepts Used
//!
//! - `#[async_trait]` so the chain selector can hold `Arc<dyn AuthProvider>`
//! - `parking_lot::RwLock` guards the key cache; it is never held across `.await`
//! - `tokio::sync::Mutex` is held across the fetch to make refreshes single-flight

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jsonwebtoken::jwk::{JwkSet, PublicKeyUse};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::JwtConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{CredentialSource, Identity};

/// Lower bound between refetches triggered by an unknown `kid`
const UNKNOWN_KID_REFETCH: Duration = Duration::from_secs(10);

/// Validates a raw bearer token and yields the caller's identity
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> GatewayResult<Identity>;
}

/// Registered claims the gateway reads; everything else lands in `extra`
#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl From<JwtClaims> for Identity {
    fn from(claims: JwtClaims) -> Self {
        Identity {
            subject: claims.sub,
            issuer: claims.iss,
            expires_at: Utc.timestamp_opt(claims.exp, 0).single(),
            scopes: claims
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            claims: claims.extra,
            source: CredentialSource::Bearer,
        }
    }
}

#[derive(Default)]
struct JwksCache {
    jwks_uri: Option<String>,
    keys: Vec<(Option<String>, DecodingKey)>,
    fetched_at: Option<Instant>,
    /// Completed refresh attempts, successful or not
    attempts: u64,
}

impl JwksCache {
    fn find(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|(key_id, _)| key_id.as_deref() == Some(kid))
                .map(|(_, key)| key.clone()),
            // Without a kid the choice is only unambiguous for a single-key set
            None if self.keys.len() == 1 => Some(self.keys[0].1.clone()),
            None => None,
        }
    }

    fn is_stale(&self, interval: Duration) -> bool {
        self.fetched_at.map(|at| at.elapsed() >= interval).unwrap_or(true)
    }
}

enum KeySource {
    Secret(DecodingKey),
    Remote {
        client: reqwest::Client,
        cache: RwLock<JwksCache>,
        refreshing: Mutex<()>,
    },
}

/// JWT bearer-token provider
pub struct JwtAuthProvider {
    config: JwtConfig,
    algorithms: Vec<Algorithm>,
    keys: KeySource,
}

impl JwtAuthProvider {
    /// Build a provider from configuration. No network calls happen here;
    /// remote keys are fetched on first use.
    pub fn new(config: JwtConfig) -> GatewayResult<Self> {
        let shared_secret = config.issuer_uri.is_none() && config.jwk_set_uri.is_none();

        let mut algorithms = config
            .algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name)
                    .map_err(|_| GatewayError::config(format!("Unsupported JWT algorithm '{}'", name)))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        if algorithms.is_empty() {
            algorithms.push(if shared_secret { Algorithm::HS256 } else { Algorithm::RS256 });
        }

        let keys = if shared_secret {
            let secret = config.secret.as_deref().ok_or_else(|| {
                GatewayError::config("security.jwt needs one of issuer_uri, jwk_set_uri or secret")
            })?;
            if let Some(algorithm) = algorithms.iter().find(|a| !is_hmac(**a)) {
                return Err(GatewayError::config(format!(
                    "JWT algorithm {:?} cannot be verified with a shared secret",
                    algorithm
                )));
            }
            KeySource::Secret(DecodingKey::from_secret(secret.as_bytes()))
        } else {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| GatewayError::config(format!("Failed to build JWKS client: {}", e)))?;
            KeySource::Remote {
                client,
                cache: RwLock::new(JwksCache {
                    jwks_uri: config.jwk_set_uri.clone(),
                    ..JwksCache::default()
                }),
                refreshing: Mutex::new(()),
            }
        };

        Ok(Self {
            config,
            algorithms,
            keys,
        })
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.config.leeway.as_secs();

        let mut required = vec!["exp", "sub"];
        if let Some(issuer) = &self.config.issuer_uri {
            validation.set_issuer(&[issuer.as_str()]);
            required.push("iss");
        }
        if self.config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(self.config.audiences.as_slice());
            required.push("aud");
        }
        validation.set_required_spec_claims(required.as_slice());
        validation
    }

    async fn decoding_key(&self, algorithm: Algorithm, kid: Option<&str>) -> GatewayResult<DecodingKey> {
        if !self.algorithms.contains(&algorithm) {
            return Err(GatewayError::auth(format!("Algorithm {:?} not accepted", algorithm)));
        }

        match &self.keys {
            KeySource::Secret(key) => Ok(key.clone()),
            KeySource::Remote {
                client,
                cache,
                refreshing,
            } => {
                let (cached, stale, recently_fetched, attempts) = {
                    let cache = cache.read();
                    (
                        cache.find(kid),
                        cache.is_stale(self.config.jwks_refresh_interval),
                        !cache.is_stale(UNKNOWN_KID_REFETCH),
                        cache.attempts,
                    )
                };

                if let Some(key) = &cached {
                    if !stale {
                        return Ok(key.clone());
                    }
                }

                if stale || (cached.is_none() && !recently_fetched) {
                    let _refreshing = refreshing.lock().await;
                    let current = cache.read().attempts;

                    // Skip the fetch when another request refreshed while this one waited
                    if current == attempts {
                        let result = self.refresh(client, cache).await;
                        cache.write().attempts += 1;
                        if let Err(e) = result {
                            // Keep serving the last good key set if the issuer is down
                            if let Some(key) = cached {
                                warn!(error = %e, "JWKS refresh failed, using cached keys");
                                return Ok(key);
                            }
                            return Err(e);
                        }
                    }
                }

                cache
                    .read()
                    .find(kid)
                    .ok_or_else(|| GatewayError::auth(format!("No signing key for kid {:?}", kid)))
            }
        }
    }

    async fn refresh(&self, client: &reqwest::Client, cache: &RwLock<JwksCache>) -> GatewayResult<()> {
        let known_uri = cache.read().jwks_uri.clone();
        let jwks_uri = match known_uri {
            Some(uri) => uri,
            None => self.discover_jwks_uri(client).await?,
        };

        debug!(jwks_uri = %jwks_uri, "Fetching JWK set");
        let set: JwkSet = client
            .get(&jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut keys = Vec::with_capacity(set.keys.len());
        for jwk in &set.keys {
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => keys.push((jwk.common.key_id.clone(), key)),
                Err(e) => warn!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK"),
            }
        }

        info!(jwks_uri = %jwks_uri, keys = keys.len(), "JWK set refreshed");
        let mut cache = cache.write();
        cache.jwks_uri = Some(jwks_uri);
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }

    async fn discover_jwks_uri(&self, client: &reqwest::Client) -> GatewayResult<String> {
        #[derive(Deserialize)]
        struct ProviderMetadata {
            issuer: String,
            jwks_uri: String,
        }

        let issuer = self
            .config
            .issuer_uri
            .as_deref()
            .ok_or_else(|| GatewayError::config("No issuer_uri to discover keys from"))?;
        let url = format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));

        let metadata: ProviderMetadata = client.get(&url).send().await?.error_for_status()?.json().await?;
        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(GatewayError::config(format!(
                "Issuer metadata at {} names issuer '{}'",
                url, metadata.issuer
            )));
        }
        Ok(metadata.jwks_uri)
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    async fn authenticate(&self, token: &str) -> GatewayResult<Identity> {
        let header = decode_header(token).map_err(|e| GatewayError::auth(format!("Malformed token: {}", e)))?;
        let key = self.decoding_key(header.alg, header.kid.as_deref()).await?;

        let data = decode::<JwtClaims>(token, &key, &self.validation(header.alg))
            .map_err(|e| GatewayError::auth(format!("Token rejected: {}", e)))?;

        Ok(Identity::from(data.claims))
    }
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret";

    fn provider() -> JwtAuthProvider {
        JwtAuthProvider::new(JwtConfig {
            secret: Some(SECRET.to_string()),
            leeway: Duration::from_secs(0),
            ..JwtConfig::default()
        })
        .unwrap()
    }

    fn token(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let exp = Utc::now().timestamp() + 300;
        let identity = provider()
            .authenticate(&token(json!({ "sub": "u1", "exp": exp, "scope": "read write", "email": "a@b.c" })))
            .await
            .unwrap();

        assert_eq!(identity.subject, "u1");
        assert_eq!(identity.scopes, vec!["read", "write"]);
        assert_eq!(identity.claims["email"], "a@b.c");
        assert_eq!(identity.source, CredentialSource::Bearer);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let exp = Utc::now().timestamp() - 60;
        let result = provider().authenticate(&token(json!({ "sub": "u1", "exp": exp }))).await;
        assert!(matches!(result, Err(GatewayError::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_wrong_signature_rejected() {
        let exp = Utc::now().timestamp() + 300;
        let forged = encode(
            &Header::default(),
            &json!({ "sub": "u1", "exp": exp }),
            &EncodingKey::from_secret(b"someone-else"),
        )
        .unwrap();
        assert!(provider().authenticate(&forged).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_subject_rejected() {
        let exp = Utc::now().timestamp() + 300;
        assert!(provider().authenticate(&token(json!({ "exp": exp }))).await.is_err());
    }

    #[tokio::test]
    async fn test_issuer_checked_when_configured() {
        let provider = JwtAuthProvider::new(JwtConfig {
            secret: Some(SECRET.to_string()),
            ..JwtConfig::default()
        })
        .unwrap();
        // Secret-only config has no issuer; add one through a second provider
        let strict = JwtAuthProvider {
            config: JwtConfig {
                issuer_uri: Some("https://sso.fittracker.dev/realms/app".to_string()),
                ..provider.config.clone()
            },
            algorithms: provider.algorithms.clone(),
            keys: KeySource::Secret(DecodingKey::from_secret(SECRET.as_bytes())),
        };

        let exp = Utc::now().timestamp() + 300;
        let foreign = token(json!({ "sub": "u1", "exp": exp, "iss": "https://evil.example" }));
        let own = token(json!({ "sub": "u1", "exp": exp, "iss": "https://sso.fittracker.dev/realms/app" }));

        assert!(strict.authenticate(&foreign).await.is_err());
        assert!(strict.authenticate(&own).await.is_ok());
    }

    #[tokio::test]
    async fn test_secret_honours_algorithm_list() {
        let exp = Utc::now().timestamp() + 300;
        let claims = json!({ "sub": "u1", "exp": exp });
        let hs384 = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        // Default list for a shared secret is HS256 only
        assert!(provider().authenticate(&token(claims.clone())).await.is_ok());
        assert!(provider().authenticate(&hs384).await.is_err());

        let hs384_only = JwtAuthProvider::new(JwtConfig {
            secret: Some(SECRET.to_string()),
            algorithms: vec!["HS384".to_string()],
            ..JwtConfig::default()
        })
        .unwrap();
        assert!(hs384_only.authenticate(&hs384).await.is_ok());
        assert!(hs384_only.authenticate(&token(claims)).await.is_err());
    }

    #[test]
    fn test_secret_with_asymmetric_algorithm_is_config_error() {
        let result = JwtAuthProvider::new(JwtConfig {
            secret: Some(SECRET.to_string()),
            algorithms: vec!["RS256".to_string()],
            ..JwtConfig::default()
        });
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_key_fetch() {
        use std::sync::Arc;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let jwks = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(200))
                    .set_body_json(json!({
                        "keys": [{
                            "kty": "oct",
                            "kid": "k1",
                            "alg": "HS256",
                            "k": "andrcy10ZXN0LXNlY3JldC0wMTIzNDU2Nzg5YWJj"
                        }]
                    })),
            )
            .expect(1)
            .mount(&jwks)
            .await;

        let provider = Arc::new(
            JwtAuthProvider::new(JwtConfig {
                jwk_set_uri: Some(format!("{}/jwks", jwks.uri())),
                algorithms: vec!["HS256".to_string()],
                ..JwtConfig::default()
            })
            .unwrap(),
        );

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".to_string());
        let signed = encode(
            &header,
            &json!({ "sub": "u1", "exp": Utc::now().timestamp() + 300 }),
            &EncodingKey::from_secret(b"jwks-test-secret-0123456789abc"),
        )
        .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                let signed = signed.clone();
                tokio::spawn(async move { provider.authenticate(&signed).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        assert!(provider().authenticate("not-a-jwt").await.is_err());
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
