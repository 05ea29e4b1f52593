//! Elasticsearch user provisioning.
//!
//! [`resolve_roles`] turns identity-provider groups into role names and
//! [`ElasticsearchClient`] writes the resulting user through the Security API.

mod client;
mod roles;

pub use client::{ElasticsearchClient, ElasticsearchUser, ElasticsearchUserMetadata};
pub use roles::{RoleTable, resolve_roles};
