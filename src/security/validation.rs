//! Input validation for identity fields.
//!
//! Every identity produced by a provider passes through
//! [`validate_user_info`] before it is used. Failures are reported as
//! [`Error::ValidationFailed`] so callers can answer 400 rather than 401.

use std::sync::LazyLock;

use regex::Regex;

use crate::provider::UserInfo;
use crate::{Error, Result};

/// Maximum username length.
pub const MAX_USERNAME_LEN: usize = 255;
/// Maximum email length.
pub const MAX_EMAIL_LEN: usize = 320;
/// Maximum full name length.
pub const MAX_NAME_LEN: usize = 500;
/// Maximum group name length.
pub const MAX_GROUP_LEN: usize = 255;

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._\-@]+$").expect("static regex"));

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("static regex")
});

fn invalid(msg: impl Into<String>) -> Error {
    Error::ValidationFailed(msg.into())
}

/// Validate a username: 1..=255 characters from `[A-Za-z0-9._-@]`.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(invalid("username cannot be empty"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(invalid(format!(
            "username exceeds maximum length of {MAX_USERNAME_LEN} characters (got {})",
            username.len()
        )));
    }
    if !USERNAME_PATTERN.is_match(username) {
        return Err(invalid(
            "username contains invalid characters; allowed: alphanumeric, dot, underscore, hyphen, at-sign",
        ));
    }
    Ok(())
}

/// Validate an email address against a basic RFC 5322 shape.
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(invalid("email cannot be empty"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(invalid(format!(
            "email exceeds maximum length of {MAX_EMAIL_LEN} characters (got {})",
            email.len()
        )));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(invalid("email format is invalid"));
    }
    Ok(())
}

/// Validate a display name: at most 500 bytes, no control characters
/// other than tab, CR, and LF.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "name exceeds maximum length of {MAX_NAME_LEN} characters (got {})",
            name.len()
        )));
    }
    if name
        .chars()
        .any(|c| (c as u32) < 32 && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err(invalid("name contains invalid control characters"));
    }
    Ok(())
}

/// Validate a single group name: 1..=255 bytes, no control characters.
pub fn validate_group(group: &str) -> Result<()> {
    if group.is_empty() {
        return Err(invalid("group name cannot be empty"));
    }
    if group.len() > MAX_GROUP_LEN {
        return Err(invalid(format!(
            "group name exceeds maximum length of {MAX_GROUP_LEN} characters (got {})",
            group.len()
        )));
    }
    if group.chars().any(|c| (c as u32) < 32) {
        return Err(invalid("group name contains invalid control characters"));
    }
    Ok(())
}

/// Validate a list of groups, optionally against a whitelist.
///
/// Whitelist matching is case-insensitive. An empty whitelist disables the check.
pub fn validate_groups(groups: &[String], whitelist: Option<&[String]>) -> Result<()> {
    let whitelist = whitelist.filter(|w| !w.is_empty());
    for group in groups {
        validate_group(group)?;
        if let Some(allowed) = whitelist {
            if !allowed.iter().any(|w| w.eq_ignore_ascii_case(group)) {
                return Err(invalid(format!("group '{group}' is not in whitelist")));
            }
        }
    }
    Ok(())
}

/// Split a comma-separated group header into trimmed, non-empty entries.
#[must_use]
pub fn parse_groups(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(String::from)
        .collect()
}

/// Validate every field of an extracted identity.
pub fn validate_user_info(user: &UserInfo, group_whitelist: Option<&[String]>) -> Result<()> {
    validate_username(&user.username)?;
    if let Some(email) = user.email.as_deref().filter(|e| !e.is_empty()) {
        validate_email(email)?;
    }
    if let Some(name) = user.full_name.as_deref() {
        validate_name(name)?;
    }
    validate_groups(&user.groups, group_whitelist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn username_length_boundary() {
        assert!(validate_username(&"a".repeat(255)).is_ok());
        assert!(validate_username(&"a".repeat(256)).is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn username_charset() {
        for ok in ["john", "john.doe", "john_doe", "john-doe", "john@example.com", "J0HN"] {
            assert!(validate_username(ok).is_ok(), "{ok} should pass");
        }
        for c in ['!', '#', '$', '%', '^', '&', '*', '(', ')', ' ', '/', ':'] {
            let name = format!("john{c}");
            assert!(
                matches!(validate_username(&name), Err(Error::ValidationFailed(_))),
                "{name} should fail"
            );
        }
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("john@example.com").is_ok());
        assert!(validate_email("j.o+tag@sub.example.io").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("john@localhost").is_err());

        let long = format!("{}@example.com", "a".repeat(320));
        assert!(validate_email(&long).is_err());
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("John Doe").is_ok());
        assert!(validate_name("John\tDoe\r\n").is_ok());
        assert!(validate_name("").is_ok());
        assert!(validate_name("John\u{0}Doe").is_err());
        assert!(validate_name("John\u{1b}Doe").is_err());
        assert!(validate_name(&"x".repeat(501)).is_err());
    }

    #[test]
    fn group_validation() {
        assert!(validate_group("admins").is_ok());
        assert!(validate_group("").is_err());
        assert!(validate_group(&"g".repeat(256)).is_err());
        assert!(validate_group("bad\ngroup").is_err());
    }

    #[test]
    fn whitelist_is_case_insensitive() {
        let whitelist = vec!["Admin".to_string(), "dev".to_string()];
        let groups = vec!["admin".to_string(), "DEV".to_string()];
        assert!(validate_groups(&groups, Some(&whitelist)).is_ok());

        let groups = vec!["admin".to_string(), "ops".to_string()];
        assert!(validate_groups(&groups, Some(&whitelist)).is_err());

        // empty whitelist disables the check
        assert!(validate_groups(&groups, Some(&[])).is_ok());
    }

    #[test]
    fn parse_groups_trims_and_skips_empty() {
        assert_eq!(
            parse_groups(" admin, dev ,,ops "),
            vec!["admin".to_string(), "dev".to_string(), "ops".to_string()]
        );
        assert!(parse_groups("").is_empty());
    }

    #[test]
    fn user_info_validation_covers_all_fields() {
        let mut user = UserInfo {
            username: "john".into(),
            email: Some("john@example.com".into()),
            full_name: Some("John".into()),
            groups: vec!["admin".into()],
        };
        assert!(validate_user_info(&user, None).is_ok());

        user.email = Some("broken".into());
        assert!(validate_user_info(&user, None).is_err());

        user.email = Some(String::new());
        assert!(validate_user_info(&user, None).is_ok());
    }
}
