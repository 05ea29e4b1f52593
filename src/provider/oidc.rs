//! OIDC token provider: bearer token validation and claim mapping.
//!
//! # Validation flow
//!
//! 1. Take the token from `Authorization: Bearer`, then the `access_token`
//!    cookie, then the `id_token` cookie.
//! 2. Validate it according to `token_validation`:
//!    - `jwks`: decode the JWT header for `kid`/`alg`, fetch the issuer's
//!      JWKS (cached for 1 hour; refreshed once on unknown `kid`), verify the
//!      signature plus `exp`, `iss`, and `aud`.
//!    - `userinfo`: call the userinfo endpoint with the token; a 200 answer
//!      carries the claims.
//!    - `both`: JWKS first, userinfo when that fails.
//! 3. Map claims to identity fields through the configured (dotted) claim
//!    paths.
//!
//! Endpoints come from discovery (`{issuer}/.well-known/openid-configuration`)
//! unless set explicitly.

use std::time::{Duration, Instant};

use axum::http::{HeaderMap, header};
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::UserInfo;
use crate::config::{OidcConfig, TokenValidation};
use crate::{Error, Result};

/// Cookies checked for a token when no bearer header is present
const TOKEN_COOKIES: [&str; 2] = ["access_token", "id_token"];

/// Error variants for OIDC validation failures.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// JWT decode / signature verification failed.
    #[error("JWT verification failed: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the provider's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// Network or HTTP error while calling the issuer.
    #[error("OIDC request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The userinfo endpoint rejected the token.
    #[error("userinfo endpoint returned status {0}")]
    UserinfoRejected(u16),

    /// An endpoint needed for the configured validation mode is unknown.
    #[error("{0} endpoint not configured")]
    EndpointMissing(&'static str),
}

impl From<OidcError> for Error {
    fn from(e: OidcError) -> Self {
        Error::InvalidToken(e.to_string())
    }
}

/// Subset of the discovery document we use.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: Option<String>,
    userinfo_endpoint: Option<String>,
}

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// JWKS cache keyed by JWKS URI.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    /// How long to cache a fetched JWKS (default 1 hour).
    ttl: Duration,
}

impl JwksCache {
    /// Create with default 1-hour TTL.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            inner: DashMap::new(),
            http,
            ttl: Duration::from_secs(3600),
        }
    }

    /// Return the cached JWKS for `jwks_uri`, fetching it when stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(&self, jwks_uri: &str, force_refresh: bool) -> std::result::Result<JwkSet, OidcError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_uri) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!("Fetching JWKS from {jwks_uri}");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );

        Ok(jwks)
    }
}

/// Token-based identity provider
pub struct OidcProvider {
    config: OidcConfig,
    http: reqwest::Client,
    jwks_cache: JwksCache,
    jwks_uri: Option<String>,
    userinfo_endpoint: Option<String>,
}

impl OidcProvider {
    /// Create the provider, running discovery when an issuer is configured.
    ///
    /// Explicitly configured endpoints take precedence over discovered ones.
    pub async fn new(config: OidcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build OIDC HTTP client: {e}")))?;

        let mut jwks_uri = config.jwks_uri.clone();
        let mut userinfo_endpoint = config.userinfo_endpoint.clone();

        if let Some(issuer) = config.issuer.as_deref().filter(|i| !i.is_empty()) {
            if !issuer.starts_with("https://") {
                warn!(issuer = %issuer, "OIDC issuer is not HTTPS");
            }
            let doc = discover(&http, issuer).await?;
            jwks_uri = jwks_uri.or(doc.jwks_uri);
            userinfo_endpoint = userinfo_endpoint.or(doc.userinfo_endpoint);
            info!(issuer = %issuer, "OIDC discovery complete");
        }

        Ok(Self {
            jwks_cache: JwksCache::new(http.clone()),
            config,
            http,
            jwks_uri,
            userinfo_endpoint,
        })
    }

    /// Extract, validate, and map the caller's token to an identity.
    pub async fn get_user(&self, headers: &HeaderMap) -> Result<UserInfo> {
        let token = extract_token(headers).ok_or_else(|| {
            Error::MissingIdentity("no authentication token found in request".to_string())
        })?;
        let claims = self.validate_token(&token).await?;
        self.map_claims(&claims)
    }

    async fn validate_token(&self, token: &str) -> std::result::Result<Value, OidcError> {
        match self.config.token_validation {
            TokenValidation::Jwks => self.validate_with_jwks(token).await,
            TokenValidation::Userinfo => self.validate_with_userinfo(token).await,
            TokenValidation::Both => match self.validate_with_jwks(token).await {
                Ok(claims) => Ok(claims),
                Err(e) => {
                    debug!(error = %e, "JWKS validation failed, trying userinfo");
                    self.validate_with_userinfo(token).await
                }
            },
        }
    }

    async fn validate_with_jwks(&self, token: &str) -> std::result::Result<Value, OidcError> {
        let jwks_uri = self.jwks_uri.as_deref().ok_or(OidcError::EndpointMissing("JWKS"))?;

        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.clone().ok_or(OidcError::MissingKeyId)?;
        let decoding_key = self.find_decoding_key(&kid, jwks_uri).await?;

        let mut validation = build_validation(&header);
        validation.set_audience(&[self.config.client_id.as_str()]);
        if let Some(issuer) = self.config.issuer.as_deref().filter(|i| !i.is_empty()) {
            validation.set_issuer(&[issuer]);
        }

        let data: TokenData<Value> = jsonwebtoken::decode(token, &decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache if not found.
    async fn find_decoding_key(&self, kid: &str, jwks_uri: &str) -> std::result::Result<DecodingKey, OidcError> {
        let jwks = self.jwks_cache.get_or_fetch(jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks_cache.get_or_fetch(jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))
    }

    async fn validate_with_userinfo(&self, token: &str) -> std::result::Result<Value, OidcError> {
        let endpoint = self
            .userinfo_endpoint
            .as_deref()
            .ok_or(OidcError::EndpointMissing("userinfo"))?;

        let mut request = self.http.get(endpoint).bearer_auth(token);
        for (name, value) in &self.config.custom_headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(OidcError::UserinfoRejected(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    fn map_claims(&self, claims: &Value) -> Result<UserInfo> {
        let mappings = &self.config.claim_mappings;
        let username = claim_value(claims, &mappings.username).ok_or_else(|| {
            Error::MissingClaim(format!("username claim '{}' not found or empty", mappings.username))
        })?;

        Ok(UserInfo {
            username,
            email: claim_value(claims, &mappings.email),
            full_name: claim_value(claims, &mappings.full_name),
            groups: claim_list(claims, &mappings.groups),
        })
    }
}

async fn discover(http: &reqwest::Client, issuer: &str) -> Result<DiscoveryDocument> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    );
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Config(format!("OIDC discovery failed for {issuer}: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::Config(format!(
            "OIDC discovery failed for {issuer}: status {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Error::Config(format!("invalid OIDC discovery document: {e}")))
}

/// Bearer token, else the first non-empty token cookie.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    TOKEN_COOKIES
        .iter()
        .find_map(|name| cookie_value(headers, name))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

/// Walk a dotted claim path such as `realm_access.roles`.
fn claim_at<'a>(claims: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(claims, |current, part| current.get(part))
}

/// Non-empty string claim.
fn claim_value(claims: &Value, path: &str) -> Option<String> {
    claim_at(claims, path)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// List claim; a single string counts as a one-element list.
fn claim_list(claims: &Value, path: &str) -> Vec<String> {
    match claim_at(claims, path) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60; // 60-second clock skew tolerance
    v
}
