//! HTTP router and handlers

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, error, warn};

use super::proxy::{ProxyForwarder, proxy_handler};
use crate::broker::{BrokerContext, CredentialBroker};
use crate::cache::{CACHE_KEY_PREFIX, build_cache};
use crate::config::Config;
use crate::provider::IdentityProvider;
use crate::{Error, Result, metrics};

/// Paths under this prefix are always served locally
pub const RESERVED_PREFIX: &str = "/elastauth";

/// How non-reserved paths are handled. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Answer with credentials in a response header
    AuthOnly,
    /// Forward to Elasticsearch with credentials injected
    TransparentProxy,
}

impl OperatingMode {
    /// Mode selected by `proxy.enabled`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        if config.proxy.enabled {
            Self::TransparentProxy
        } else {
            Self::AuthOnly
        }
    }

    /// Name used in logs and the config endpoint
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthOnly => "auth-only",
            Self::TransparentProxy => "proxy",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared application state
pub struct AppState {
    /// Operating mode
    pub mode: OperatingMode,
    /// Identity provider
    pub provider: IdentityProvider,
    /// Credential broker
    pub broker: CredentialBroker,
    /// Upstream client, present in proxy mode
    pub proxy: Option<ProxyForwarder>,
    /// Allowed groups, when restricted
    pub group_whitelist: Option<Vec<String>>,
    /// Masked configuration snapshot
    pub effective_config: Value,
    /// Prometheus handle, installed by the server
    #[cfg(feature = "metrics")]
    pub metrics: Option<crate::metrics::MetricsHandle>,
}

impl AppState {
    /// Build every runtime component from a validated configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mode = OperatingMode::from_config(config);
        let cache = build_cache(&config.cache).await?;
        let provider = IdentityProvider::from_config(config).await?;
        let broker = CredentialBroker::new(BrokerContext::from_config(config, cache)?);
        let proxy = match mode {
            OperatingMode::TransparentProxy => {
                Some(ProxyForwarder::new(&config.proxy, &provider.identity_headers())?)
            }
            OperatingMode::AuthOnly => None,
        };

        Ok(Self {
            mode,
            provider,
            broker,
            proxy,
            group_whitelist: config.group_whitelist.clone(),
            effective_config: config.effective(),
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(RESERVED_PREFIX, get(auth_handler))
        .route("/elastauth/config", get(config_handler))
        .route("/elastauth/health", get(health_handler))
        .route("/elastauth/ready", get(ready_handler))
        .route("/elastauth/live", get(live_handler))
        .route("/elastauth/metrics", get(metrics_handler))
        .route("/elastauth/", any(reserved_not_found))
        .route("/elastauth/{*rest}", any(reserved_not_found))
        .fallback(dispatch)
        .layer(middleware::from_fn(track_requests))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Route everything outside the reserved prefix by operating mode
async fn dispatch(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match state.mode {
        OperatingMode::AuthOnly => auth_response(&state, request.headers()).await,
        OperatingMode::TransparentProxy => proxy_handler(State(state), request).await,
    }
}

/// GET /elastauth
async fn auth_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    auth_response(&state, &headers).await
}

/// Auth-only responder: empty body, credentials in `Authorization`
async fn auth_response(state: &AppState, headers: &HeaderMap) -> Response {
    let user = match state
        .provider
        .get_user(headers, state.group_whitelist.as_deref())
        .await
    {
        Ok(user) => {
            metrics::record_authentication(true);
            user
        }
        Err(e) => {
            metrics::record_authentication(false);
            warn!(error = %e, "Failed to extract user");
            return error_response(&e);
        }
    };

    let creds = match state.broker.resolve(&user).await {
        Ok(creds) => creds,
        Err(e) => {
            error!(username = %user.username, error = %e, "Failed to resolve credentials");
            return error_response(&e);
        }
    };

    let mut value = match HeaderValue::from_str(&creds.basic_auth_header()) {
        Ok(v) => v,
        Err(e) => return error_response(&Error::Internal(e.to_string())),
    };
    value.set_sensitive(true);
    debug!(username = %creds.username, "Issued credentials");

    (StatusCode::OK, [(header::AUTHORIZATION, value)]).into_response()
}

/// `{message, code}` body for auth-only failures
fn error_response(err: &Error) -> Response {
    metrics::record_error(err.kind());
    let status = err.status_code();
    (
        status,
        Json(json!({
            "message": err.public_message(),
            "code": status.as_u16(),
        })),
    )
        .into_response()
}

/// GET /elastauth/config
async fn config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.effective_config.clone())
}

/// GET /elastauth/health
async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "OK"}))
}

/// GET /elastauth/live
async fn live_handler() -> impl IntoResponse {
    Json(json!({"status": "alive"}))
}

/// GET /elastauth/ready: the cache backend answers
async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    let probe = format!("{CACHE_KEY_PREFIX}readiness-probe");
    match state.broker.context().cache().get(&probe).await {
        Ok(_) => Json(json!({"status": "ready"})).into_response(),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not ready"})),
            )
                .into_response()
        }
    }
}

/// GET /elastauth/metrics
#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => reserved_not_found().await,
    }
}

/// GET /elastauth/metrics
#[cfg(not(feature = "metrics"))]
async fn metrics_handler() -> Response {
    reserved_not_found().await
}

async fn reserved_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "Not found", "code": 404})),
    )
        .into_response()
}

/// Request counters, latency and the in-flight gauge
async fn track_requests(request: Request, next: Next) -> Response {
    let _active = metrics::ActiveRequest::start();
    let method = request.method().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    metrics::record_request(method.as_str(), response.status().as_u16(), started.elapsed());
    response
}
