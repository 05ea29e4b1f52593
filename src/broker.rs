//! Credential broker.
//!
//! Maps a verified identity onto a transient Elasticsearch user. The first
//! request for a user inside a cache window generates a password, provisions
//! the user, and stores the sealed password; later requests in the same
//! window decrypt the cached value and get the same password back.
//!
//! A cached entry that cannot be decoded or decrypted fails the request.
//! It is never silently replaced, since that would hide tampering.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::cache::{CredentialCache, cache_key};
use crate::config::Config;
use crate::crypto;
use crate::elasticsearch::{ElasticsearchClient, ElasticsearchUser, ElasticsearchUserMetadata, RoleTable};
use crate::metrics;
use crate::provider::UserInfo;
use crate::{Error, Result};

/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 32;

/// Digits contained in every generated password
const PASSWORD_DIGITS: usize = 10;

const DIGITS: &[u8] = b"0123456789";
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a 32 character password with no repeated characters.
///
/// Contains all ten digits and 22 distinct letters of mixed case, in random
/// order.
#[must_use]
pub fn generate_password() -> String {
    let mut rng = rand::rng();

    let mut letters = LETTERS.to_vec();
    letters.shuffle(&mut rng);

    let mut chars: Vec<u8> = DIGITS[..PASSWORD_DIGITS].to_vec();
    chars.extend_from_slice(&letters[..PASSWORD_LENGTH - PASSWORD_DIGITS]);
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

/// `Basic base64(username:password)`
#[must_use]
pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Elasticsearch credentials handed to a single request
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredentials {
    /// Elasticsearch username, identical to the identity username
    pub username: String,
    /// Plaintext password
    pub password: String,
}

impl UserCredentials {
    /// Value for an `Authorization` header
    #[must_use]
    pub fn basic_auth_header(&self) -> String {
        basic_auth_header(&self.username, &self.password)
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &crate::security::REDACTED)
            .finish()
    }
}

/// Shared state the broker needs, built once at startup
pub struct BrokerContext {
    cache: Arc<dyn CredentialCache>,
    secret_key: String,
    elasticsearch: ElasticsearchClient,
    roles: RoleTable,
    dry_run: bool,
    extend_cache: bool,
}

impl BrokerContext {
    /// Assemble a context. Dry-run and TTL extension start disabled.
    #[must_use]
    pub fn new(
        cache: Arc<dyn CredentialCache>,
        secret_key: impl Into<String>,
        elasticsearch: ElasticsearchClient,
        roles: RoleTable,
    ) -> Self {
        Self {
            cache,
            secret_key: secret_key.into(),
            elasticsearch,
            roles,
            dry_run: false,
            extend_cache: false,
        }
    }

    /// Build from configuration around an initialised cache
    pub fn from_config(config: &Config, cache: Arc<dyn CredentialCache>) -> Result<Self> {
        crypto::validate_key(config.secret_key())?;
        let elasticsearch = ElasticsearchClient::new(&config.elasticsearch)?;
        let roles = RoleTable::new(&config.group_mappings, &config.default_roles);
        Ok(Self::new(cache, config.secret_key(), elasticsearch, roles)
            .with_dry_run(config.elasticsearch.dry_run)
            .with_extend_cache(config.extend_cache))
    }

    /// Skip Elasticsearch writes
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reset the TTL of entries that are read back
    #[must_use]
    pub fn with_extend_cache(mut self, extend_cache: bool) -> Self {
        self.extend_cache = extend_cache;
        self
    }

    /// Credential cache backend
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CredentialCache> {
        &self.cache
    }

    /// Elasticsearch admin client
    #[must_use]
    pub fn elasticsearch(&self) -> &ElasticsearchClient {
        &self.elasticsearch
    }

    /// Whether Elasticsearch writes are skipped
    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Resolves identities to Elasticsearch credentials
pub struct CredentialBroker {
    ctx: BrokerContext,
}

impl CredentialBroker {
    /// Create a broker over `ctx`
    #[must_use]
    pub fn new(ctx: BrokerContext) -> Self {
        Self { ctx }
    }

    /// Broker state
    #[must_use]
    pub fn context(&self) -> &BrokerContext {
        &self.ctx
    }

    /// Credentials for `user`, provisioning the account on a cache miss.
    ///
    /// The cache is written only after Elasticsearch accepted the user, so
    /// a failed or cancelled request leaves no entry behind.
    pub async fn resolve(&self, user: &UserInfo) -> Result<UserCredentials> {
        let key = cache_key(&user.username);

        if let Some(sealed) = self.ctx.cache.get(&key).await? {
            metrics::record_cache(true);
            debug!(username = %user.username, "Credential cache hit");
            let password = self.unseal(&sealed)?;
            if self.ctx.extend_cache {
                self.extend(&key, &sealed).await;
            }
            return Ok(UserCredentials {
                username: user.username.clone(),
                password,
            });
        }

        metrics::record_cache(false);
        debug!(username = %user.username, "Credential cache miss");

        let password = generate_password();
        let roles = self.ctx.roles.resolve(&user.groups);
        let payload = ElasticsearchUser {
            enabled: true,
            email: user.email.clone().unwrap_or_default(),
            password: password.clone(),
            metadata: ElasticsearchUserMetadata {
                groups: user.groups.clone(),
            },
            full_name: user.full_name.clone().unwrap_or_default(),
            roles,
        };

        if self.ctx.dry_run {
            info!(username = %user.username, roles = ?payload.roles, "Dry run, skipping Elasticsearch upsert");
        } else {
            self.ctx
                .elasticsearch
                .upsert_user(&user.username, &payload)
                .await?;
            info!(username = %user.username, roles = ?payload.roles, "Provisioned Elasticsearch user");
        }

        let sealed = self.seal(&password)?;
        self.ctx.cache.set(&key, &sealed).await?;

        Ok(UserCredentials {
            username: user.username.clone(),
            password,
        })
    }

    fn seal(&self, password: &str) -> Result<String> {
        let ciphertext = crypto::encrypt(password, &self.ctx.secret_key)
            .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
        Ok(URL_SAFE.encode(ciphertext))
    }

    fn unseal(&self, sealed: &str) -> Result<String> {
        let raw = URL_SAFE
            .decode(sealed)
            .map_err(|e| Error::CacheCorrupted(format!("invalid base64: {e}")))?;
        let ciphertext = String::from_utf8(raw)
            .map_err(|_| Error::CacheCorrupted("ciphertext is not UTF-8".into()))?;
        crypto::decrypt(&ciphertext, &self.ctx.secret_key)
            .map_err(|e| Error::CacheCorrupted(e.to_string()))
    }

    async fn extend(&self, key: &str, sealed: &str) {
        let default_ttl = self.ctx.cache.ttl();
        match self.ctx.cache.get_item_ttl(key).await {
            Ok(Some(remaining)) if remaining < default_ttl => {
                debug!(key, ?remaining, ?default_ttl, "Extending cache TTL");
                if let Err(e) = self.ctx.cache.extend_ttl(key, sealed).await {
                    warn!(key, error = %e, "Failed to extend cache TTL");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(key, error = %e, "Failed to read cache TTL"),
        }
    }
}
