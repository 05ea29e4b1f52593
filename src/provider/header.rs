//! Forward-auth header provider

use axum::http::HeaderMap;

use super::UserInfo;
use crate::config::AutheliaConfig;
use crate::security::parse_groups;
use crate::{Error, Result};

/// Reads identity from headers injected by a forward-auth proxy
pub struct HeaderProvider {
    config: AutheliaConfig,
}

impl HeaderProvider {
    /// Create a provider reading the configured header names
    #[must_use]
    pub fn new(config: AutheliaConfig) -> Self {
        Self { config }
    }

    /// Header names this provider consumes
    #[must_use]
    pub fn header_names(&self) -> [&str; 4] {
        [
            self.config.header_username.as_str(),
            self.config.header_groups.as_str(),
            self.config.header_email.as_str(),
            self.config.header_name.as_str(),
        ]
    }

    /// Extract the identity. Fails with `MissingIdentity` when the username
    /// header is absent or blank.
    pub fn get_user(&self, headers: &HeaderMap) -> Result<UserInfo> {
        let username = header_value(headers, &self.config.header_username)?
            .ok_or_else(|| {
                Error::MissingIdentity(format!("{} header not provided", self.config.header_username))
            })?;

        let groups = header_value(headers, &self.config.header_groups)?
            .map(|g| parse_groups(&g))
            .unwrap_or_default();

        Ok(UserInfo {
            username,
            email: header_value(headers, &self.config.header_email)?,
            full_name: header_value(headers, &self.config.header_name)?,
            groups,
        })
    }
}

/// Trimmed, non-empty header value decoded as UTF-8. Content checks are left
/// to the field validators; only bytes that are not UTF-8 are rejected here.
fn header_value(headers: &HeaderMap, name: &str) -> Result<Option<String>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = std::str::from_utf8(value.as_bytes())
        .map_err(|_| Error::ValidationFailed(format!("{name} header is not valid UTF-8")))?
        .trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}
