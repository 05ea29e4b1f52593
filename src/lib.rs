//! elastauth library
//!
//! Maps identities asserted by an upstream authentication layer onto
//! transient Elasticsearch users.
//!
//! # Features
//!
//! - **Identity providers**: forward-auth headers (Authelia) or OIDC bearer tokens
//! - **Credential broker**: one password per user per cache window, sealed with AES-256-GCM
//! - **Cache backends**: in-memory, Redis, filesystem
//! - **Operating modes**: auth-only responder or transparent Elasticsearch proxy
//! - **Production Ready**: health and readiness probes, Prometheus metrics, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod elasticsearch;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod provider;
pub mod security;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))?,
    }

    Ok(())
}
