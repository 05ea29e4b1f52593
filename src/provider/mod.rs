//! Identity providers.
//!
//! A provider turns an inbound request into a verified [`UserInfo`]. The set
//! of providers is closed and selected once at startup:
//!
//! - [`HeaderProvider`]: forward-auth headers set by an upstream proxy
//!   such as Authelia.
//! - [`OidcProvider`]: bearer tokens checked against an OIDC issuer.
//!
//! Every identity is validated before it is handed back, so callers never
//! see a username or group list that failed the shared validators.

pub mod header;
pub mod oidc;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use header::HeaderProvider;
pub use oidc::{OidcError, OidcProvider};

use crate::Result;
use crate::config::{AuthProviderKind, Config};
use crate::security::validate_user_info;

/// Identity extracted from a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Username, always present once validated
    pub username: String,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Group memberships in the order the provider reported them
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Configured identity provider
pub enum IdentityProvider {
    /// Forward-auth headers
    Header(HeaderProvider),
    /// OIDC bearer tokens
    Token(Box<OidcProvider>),
}

impl IdentityProvider {
    /// Build the provider selected in the configuration.
    ///
    /// The token provider performs OIDC discovery here, so this fails fast
    /// when the issuer cannot be reached.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let provider = match config.auth_provider {
            AuthProviderKind::Authelia => Self::Header(HeaderProvider::new(config.authelia.clone())),
            AuthProviderKind::Oidc => Self::Token(Box::new(OidcProvider::new(config.oidc.clone()).await?)),
        };
        info!(provider = provider.kind(), "Identity provider ready");
        Ok(provider)
    }

    /// Provider discriminator as used in configuration
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Header(_) => AuthProviderKind::Authelia.as_str(),
            Self::Token(_) => AuthProviderKind::Oidc.as_str(),
        }
    }

    /// Request headers that carry identity and must not reach Elasticsearch
    #[must_use]
    pub fn identity_headers(&self) -> Vec<String> {
        match self {
            Self::Header(p) => p.header_names().iter().map(|h| h.to_ascii_lowercase()).collect(),
            Self::Token(_) => Vec::new(),
        }
    }

    /// Extract and validate the identity carried by `headers`.
    pub async fn get_user(
        &self,
        headers: &HeaderMap,
        group_whitelist: Option<&[String]>,
    ) -> Result<UserInfo> {
        let user = match self {
            Self::Header(p) => p.get_user(headers)?,
            Self::Token(p) => p.get_user(headers).await?,
        };
        validate_user_info(&user, group_whitelist)?;
        Ok(user)
    }
}
