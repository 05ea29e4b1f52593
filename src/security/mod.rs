//! Security modules for elastauth.
//!
//! Provides log redaction and identity field validation.

pub mod sanitize;
pub mod validation;

pub use sanitize::{REDACTED, is_sensitive_field, looks_like_credential, redact_headers, redact_text, redact_value};
pub use validation::{parse_groups, validate_user_info};
