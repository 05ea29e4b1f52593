//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result, crypto};

/// Mask used for secrets in the effective-config snapshot
const MASK: &str = "***";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to
    pub listen: String,
    /// Process secret key, 64 hex characters. Generated at startup if absent.
    pub secret_key: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (text, json)
    pub log_format: String,
    /// Which identity provider authenticates requests
    pub auth_provider: AuthProviderKind,
    /// Header-based (forward-auth) provider settings
    pub authelia: AutheliaConfig,
    /// Token-based provider settings
    pub oidc: OidcConfig,
    /// Credential cache settings
    pub cache: CacheConfig,
    /// Elasticsearch admin connection
    pub elasticsearch: ElasticsearchConfig,
    /// Transparent proxy settings
    pub proxy: ProxyConfig,
    /// Roles assigned when no group mapping applies
    pub default_roles: Vec<String>,
    /// Group name to Elasticsearch roles
    pub group_mappings: HashMap<String, Vec<String>>,
    /// When set, only these groups are accepted
    pub group_whitelist: Option<Vec<String>>,
    /// Reset the cache TTL of active users on each request
    pub extend_cache: bool,
    /// How long in-flight requests may drain after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".to_string(),
            secret_key: None,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            auth_provider: AuthProviderKind::default(),
            authelia: AutheliaConfig::default(),
            oidc: OidcConfig::default(),
            cache: CacheConfig::default(),
            elasticsearch: ElasticsearchConfig::default(),
            proxy: ProxyConfig::default(),
            default_roles: Vec::new(),
            group_mappings: HashMap::new(),
            group_whitelist: None,
            extend_cache: false,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProviderKind {
    /// Forward-auth headers injected by an upstream proxy
    #[default]
    Authelia,
    /// OAuth2/OIDC bearer tokens
    Oidc,
}

impl AuthProviderKind {
    /// Configuration name of the provider
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authelia => "authelia",
            Self::Oidc => "oidc",
        }
    }
}

/// Header names read by the forward-auth provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutheliaConfig {
    /// Username header
    pub header_username: String,
    /// Comma-separated groups header
    pub header_groups: String,
    /// Email header
    pub header_email: String,
    /// Display name header
    pub header_name: String,
}

impl Default for AutheliaConfig {
    fn default() -> Self {
        Self {
            header_username: "Remote-User".to_string(),
            header_groups: "Remote-Groups".to_string(),
            header_email: "Remote-Email".to_string(),
            header_name: "Remote-Name".to_string(),
        }
    }
}

/// How bearer tokens are validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenValidation {
    /// Verify the JWT signature against the issuer's JWKS
    #[default]
    Jwks,
    /// Ask the userinfo endpoint
    Userinfo,
    /// JWKS first, userinfo on failure
    Both,
}

/// OAuth2 client authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// HTTP Basic with client id and secret
    #[default]
    ClientSecretBasic,
    /// Client id and secret in the form body
    ClientSecretPost,
}

/// Token-based provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer URL; enables discovery and `iss` checking
    pub issuer: Option<String>,
    /// OAuth2 client id, also the expected audience
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Token validation strategy
    pub token_validation: TokenValidation,
    /// Client authentication method
    pub client_auth_method: ClientAuthMethod,
    /// Explicit JWKS endpoint (overrides discovery)
    pub jwks_uri: Option<String>,
    /// Explicit userinfo endpoint (overrides discovery)
    pub userinfo_endpoint: Option<String>,
    /// Identity field to claim path (dotted for nested claims)
    pub claim_mappings: ClaimMappings,
    /// Extra headers sent to the userinfo endpoint
    pub custom_headers: HashMap<String, String>,
    /// Timeout for discovery, JWKS, and userinfo calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            client_id: String::new(),
            client_secret: String::new(),
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            token_validation: TokenValidation::default(),
            client_auth_method: ClientAuthMethod::default(),
            jwks_uri: None,
            userinfo_endpoint: None,
            claim_mappings: ClaimMappings::default(),
            custom_headers: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Claim paths for each identity field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimMappings {
    /// Username claim
    pub username: String,
    /// Email claim
    pub email: String,
    /// Groups claim (array or single string)
    pub groups: String,
    /// Display name claim
    pub full_name: String,
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            username: "preferred_username".to_string(),
            email: "email".to_string(),
            groups: "groups".to_string(),
            full_name: "name".to_string(),
        }
    }
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// In-process map; single instance only
    #[default]
    Memory,
    /// Shared Redis; horizontally scalable
    Redis,
    /// One file per entry; single instance only
    File,
}

impl CacheType {
    /// Configuration name of the backend
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::File => "file",
        }
    }
}

/// Credential cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend type
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    /// Default entry TTL
    #[serde(with = "humantime_serde")]
    pub expiration: Duration,
    /// Redis `host:port`
    pub redis_host: String,
    /// Redis database number (0-15)
    pub redis_db: u8,
    /// Directory for the file backend
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::default(),
            expiration: Duration::from_secs(3600),
            redis_host: "localhost:6379".to_string(),
            redis_db: 0,
            path: "/tmp/elastauth-cache".to_string(),
        }
    }
}

/// Elasticsearch admin connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    /// Hosts tried in order for every call
    pub hosts: Vec<String>,
    /// Admin username
    pub username: String,
    /// Admin password
    pub password: String,
    /// Skip user upserts
    pub dry_run: bool,
}

/// Transparent proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Forward non-reserved requests to Elasticsearch
    pub enabled: bool,
    /// Destination for proxied requests
    pub elasticsearch_url: String,
    /// Outbound request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Idle connections kept per host
    pub max_idle_conns: usize,
    /// How long idle connections stay pooled
    #[serde(with = "humantime_serde")]
    pub idle_conn_timeout: Duration,
    /// Outbound TLS
    pub tls: TlsConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            elasticsearch_url: String::new(),
            timeout: Duration::from_secs(30),
            max_idle_conns: 100,
            idle_conn_timeout: Duration::from_secs(90),
            tls: TlsConfig::default(),
        }
    }
}

/// Outbound TLS settings for the proxy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Apply the settings below
    pub enabled: bool,
    /// Accept any server certificate
    pub insecure_skip_verify: bool,
    /// PEM file with an extra trusted CA
    pub ca_cert: Option<String>,
    /// PEM client certificate
    pub client_cert: Option<String>,
    /// PEM client private key
    pub client_key: Option<String>,
}

impl Config {
    /// Load configuration from an optional YAML file merged with
    /// `ELASTAUTH_`-prefixed environment variables (`__` separates levels).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A local .env is optional
        if let Ok(p) = dotenvy::dotenv() {
            tracing::debug!("Loaded env file: {}", p.display());
        }

        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("ELASTAUTH_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Generate a secret key when none is configured.
    ///
    /// Returns `true` when a key was generated.
    pub fn ensure_secret_key(&mut self) -> bool {
        if self.secret_key.as_deref().is_some_and(|k| !k.is_empty()) {
            return false;
        }
        self.secret_key = Some(crypto::generate_key());
        true
    }

    /// Secret key, empty if unset
    #[must_use]
    pub fn secret_key(&self) -> &str {
        self.secret_key.as_deref().unwrap_or_default()
    }

    /// Validate the whole configuration. Any error is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        crypto::validate_key(self.secret_key())?;

        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(Error::Config(format!(
                "invalid log_level: {} (must be one of: trace, debug, info, warn, error)",
                self.log_level
            )));
        }

        if self.auth_provider == AuthProviderKind::Oidc {
            self.oidc.validate()?;
        }

        if self.cache.redis_db > 15 {
            return Err(Error::Config(format!(
                "invalid redis database number: {} (must be between 0 and 15)",
                self.cache.redis_db
            )));
        }
        if self.cache.cache_type == CacheType::File && self.cache.path.is_empty() {
            return Err(Error::Config(
                "file cache requires path configuration (set cache.path)".to_string(),
            ));
        }

        self.validate_elasticsearch()?;
        self.proxy.validate()
    }

    fn validate_elasticsearch(&self) -> Result<()> {
        let es = &self.elasticsearch;
        if es.hosts.is_empty() {
            return Err(Error::Config(
                "no Elasticsearch hosts configured (set elasticsearch.hosts)".to_string(),
            ));
        }
        if es.username.is_empty() {
            return Err(Error::Config(
                "Elasticsearch username not configured".to_string(),
            ));
        }
        if es.password.is_empty() {
            return Err(Error::Config(
                "Elasticsearch password not configured".to_string(),
            ));
        }

        let mut scheme: Option<&str> = None;
        for (i, host) in es.hosts.iter().enumerate() {
            if host.is_empty() {
                return Err(Error::Config(format!("empty Elasticsearch host at index {i}")));
            }
            let this = if host.starts_with("https://") {
                "https"
            } else if host.starts_with("http://") {
                "http"
            } else {
                return Err(Error::Config(format!(
                    "Elasticsearch host {host} must start with http:// or https://"
                )));
            };
            match scheme {
                Some(s) if s != this => {
                    return Err(Error::Config(format!(
                        "all Elasticsearch hosts must use the same protocol ({s}), but host {host} uses {this}"
                    )));
                }
                _ => scheme = Some(this),
            }
        }
        Ok(())
    }

    /// Snapshot of the effective configuration with secrets masked
    #[must_use]
    pub fn effective(&self) -> Value {
        let mut cache = serde_json::to_value(&self.cache).unwrap_or_default();
        if let Value::Object(map) = &mut cache {
            match self.cache.cache_type {
                CacheType::Memory => {
                    map.remove("redis_host");
                    map.remove("redis_db");
                    map.remove("path");
                }
                CacheType::Redis => {
                    map.remove("path");
                }
                CacheType::File => {
                    map.remove("redis_host");
                    map.remove("redis_db");
                }
            }
        }

        let provider_config = match self.auth_provider {
            AuthProviderKind::Authelia => json!({
                "header_username": self.authelia.header_username,
                "header_groups": self.authelia.header_groups,
                "header_email": self.authelia.header_email,
                "header_name": self.authelia.header_name,
            }),
            AuthProviderKind::Oidc => {
                let headers: HashMap<&str, &str> = self
                    .oidc
                    .custom_headers
                    .keys()
                    .map(|k| (k.as_str(), MASK))
                    .collect();
                json!({
                    "issuer": self.oidc.issuer,
                    "client_id": self.oidc.client_id,
                    "client_secret": MASK,
                    "scopes": self.oidc.scopes,
                    "token_validation": self.oidc.token_validation,
                    "client_auth_method": self.oidc.client_auth_method,
                    "jwks_uri": self.oidc.jwks_uri,
                    "userinfo_endpoint": self.oidc.userinfo_endpoint,
                    "claim_mappings": self.oidc.claim_mappings,
                    "custom_headers": headers,
                })
            }
        };

        json!({
            "auth_provider": self.auth_provider.as_str(),
            "mode": if self.proxy.enabled { "proxy" } else { "auth-only" },
            "cache": cache,
            "default_roles": self.default_roles,
            "group_mappings": self.group_mappings,
            "extend_cache": self.extend_cache,
            "elasticsearch": {
                "hosts": self.elasticsearch.hosts,
                "dry_run": self.elasticsearch.dry_run,
            },
            "proxy": serde_json::to_value(&self.proxy).unwrap_or_default(),
            "provider_config": provider_config,
        })
    }
}

impl OidcConfig {
    fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(Error::Config(
                "oidc provider requires client_id (set oidc.client_id)".to_string(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(Error::Config(
                "oidc provider requires client_secret (set oidc.client_secret)".to_string(),
            ));
        }
        if self.scopes.is_empty() {
            return Err(Error::Config(
                "oidc.scopes must contain at least one scope (typically 'openid')".to_string(),
            ));
        }
        if self.claim_mappings.username.is_empty() {
            return Err(Error::Config(
                "oidc provider requires claim mapping for username".to_string(),
            ));
        }

        let has_issuer = self.issuer.as_deref().is_some_and(|i| !i.is_empty());
        let needs_jwks = matches!(self.token_validation, TokenValidation::Jwks | TokenValidation::Both);
        let needs_userinfo = matches!(self.token_validation, TokenValidation::Userinfo);
        if !has_issuer && needs_jwks && self.jwks_uri.is_none() {
            return Err(Error::Config(
                "oidc jwks validation requires issuer or jwks_uri".to_string(),
            ));
        }
        if !has_issuer && needs_userinfo && self.userinfo_endpoint.is_none() {
            return Err(Error::Config(
                "oidc userinfo validation requires issuer or userinfo_endpoint".to_string(),
            ));
        }
        Ok(())
    }
}

impl ProxyConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.elasticsearch_url.is_empty() {
            return Err(Error::Config(
                "proxy.elasticsearch_url is required when proxy mode is enabled".to_string(),
            ));
        }
        if !self.elasticsearch_url.starts_with("http://")
            && !self.elasticsearch_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "proxy.elasticsearch_url must start with http:// or https://, got: {}",
                self.elasticsearch_url
            )));
        }
        url::Url::parse(&self.elasticsearch_url)
            .map_err(|e| Error::Config(format!("invalid proxy.elasticsearch_url: {e}")))?;
        if self.max_idle_conns < 1 {
            return Err(Error::Config(format!(
                "proxy.max_idle_conns must be at least 1, got: {}",
                self.max_idle_conns
            )));
        }

        let tls = &self.tls;
        if !tls.enabled {
            return Ok(());
        }
        match (&tls.client_cert, &tls.client_key) {
            (Some(_), None) => {
                return Err(Error::Config(
                    "proxy.tls.client_key is required when proxy.tls.client_cert is provided"
                        .to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(Error::Config(
                    "proxy.tls.client_cert is required when proxy.tls.client_key is provided"
                        .to_string(),
                ));
            }
            _ => {}
        }
        for (name, file) in [
            ("ca_cert", &tls.ca_cert),
            ("client_cert", &tls.client_cert),
            ("client_key", &tls.client_key),
        ] {
            if let Some(f) = file {
                if !Path::new(f).exists() {
                    return Err(Error::Config(format!(
                        "proxy.tls.{name} file does not exist: {f}"
                    )));
                }
            }
        }
        Ok(())
    }
}
