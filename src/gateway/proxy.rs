//! Transparent Elasticsearch proxy.
//!
//! Every request outside the reserved prefix runs through four stages, in
//! order, and stops at the first one that fails:
//!
//! 1. **authenticate**: identity provider plus field validation
//! 2. **inject**: broker credentials become the `Authorization` header
//! 3. **forward**: method, path, query and body go to Elasticsearch as-is
//! 4. **sanitize**: auth challenges and product headers are dropped
//!
//! Failures answer with a short plain-text body; the status carries the
//! failure class.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use reqwest::{Certificate, Client, Identity, tls};
use tracing::{debug, error, info, warn};
use url::Url;

use super::router::AppState;
use crate::broker::UserCredentials;
use crate::config::{ProxyConfig, TlsConfig};
use crate::metrics;
use crate::provider::UserInfo;
use crate::security::redact_headers;
use crate::{Error, Result};

/// Connection-scoped headers never forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response headers that would leak authentication details
const STRIPPED_RESPONSE: &[&str] = &["www-authenticate", "proxy-authenticate", "x-elastic-product"];

/// Short-circuit outcome of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRejection {
    /// No usable identity
    Unauthenticated,
    /// Identity fields failed validation
    InvalidUser,
    /// Credential resolution failed
    Internal,
    /// Elasticsearch could not be reached
    BadGateway,
    /// Elasticsearch did not answer in time
    GatewayTimeout,
}

impl ProxyRejection {
    fn from_error(err: &Error) -> Self {
        match err.status_code() {
            StatusCode::UNAUTHORIZED => Self::Unauthenticated,
            StatusCode::BAD_REQUEST => Self::InvalidUser,
            StatusCode::BAD_GATEWAY => Self::BadGateway,
            _ => Self::Internal,
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidUser => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Unauthenticated => "Authentication failed",
            Self::InvalidUser => "Invalid user information",
            Self::Internal => "Internal server error",
            Self::BadGateway => "Bad gateway",
            Self::GatewayTimeout => "Gateway timeout",
        }
    }
}

impl IntoResponse for ProxyRejection {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message(),
        )
            .into_response()
    }
}

/// Outbound half of the proxy: a pooled client bound to one cluster URL
pub struct ProxyForwarder {
    client: Client,
    target: Url,
    strip_request: Vec<HeaderName>,
}

impl ProxyForwarder {
    /// Build the pooled client. `identity_headers` are removed from every
    /// forwarded request.
    pub fn new(config: &ProxyConfig, identity_headers: &[String]) -> Result<Self> {
        let target = Url::parse(&config.elasticsearch_url).map_err(|e| {
            Error::Config(format!(
                "invalid proxy.elasticsearch_url {}: {e}",
                config.elasticsearch_url
            ))
        })?;

        let builder = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_conns)
            .pool_idle_timeout(config.idle_conn_timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none());
        let client = apply_tls(builder, &config.tls)?
            .build()
            .map_err(|e| Error::Config(format!("failed to build proxy client: {e}")))?;

        let mut strip_request: Vec<HeaderName> = Vec::new();
        for name in HOP_BY_HOP.iter().copied().map(str::to_string).chain(identity_headers.iter().cloned()) {
            let parsed = HeaderName::try_from(name.as_str())
                .map_err(|e| Error::Config(format!("invalid header name {name}: {e}")))?;
            strip_request.push(parsed);
        }
        strip_request.push(header::HOST);
        strip_request.push(header::AUTHORIZATION);

        Ok(Self {
            client,
            target,
            strip_request,
        })
    }

    /// Cluster URL requests are rewritten to
    #[must_use]
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Replace scheme and authority of `uri` with the target, keeping path
    /// and query.
    #[must_use]
    pub fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.target.clone();
        let base = self.target.path().trim_end_matches('/');
        url.set_path(&format!("{base}{}", uri.path()));
        url.set_query(uri.query());
        url
    }

    /// Headers to send upstream: inbound headers minus hop-by-hop and
    /// identity headers, plus the injected credentials.
    fn outbound_headers(&self, inbound: &HeaderMap, creds: &UserCredentials) -> Result<HeaderMap> {
        let mut headers = inbound.clone();
        strip_connection_listed(&mut headers);
        for name in &self.strip_request {
            headers.remove(name);
        }
        let mut auth = HeaderValue::from_str(&creds.basic_auth_header())
            .map_err(|e| Error::Internal(format!("invalid credential header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        Ok(headers)
    }

    async fn forward(
        &self,
        request: Request,
        creds: &UserCredentials,
    ) -> std::result::Result<reqwest::Response, ProxyRejection> {
        let (parts, body) = request.into_parts();
        let url = self.upstream_url(&parts.uri);
        let headers = self.outbound_headers(&parts.headers, creds).map_err(|e| {
            error!(error = %e, "Failed to build upstream headers");
            ProxyRejection::Internal
        })?;

        debug!(
            username = %creds.username,
            method = %parts.method,
            path = %parts.uri.path(),
            target_host = self.target.host_str().unwrap_or_default(),
            "Proxying request"
        );

        let started = Instant::now();
        let result = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;
        metrics::record_upstream(started.elapsed());

        result.map_err(|e| {
            if e.is_timeout() {
                warn!(error = %e, "Elasticsearch request timed out");
                metrics::record_error("upstream_timeout");
                ProxyRejection::GatewayTimeout
            } else {
                warn!(error = %e, "Elasticsearch request failed");
                metrics::record_error("upstream_unreachable");
                ProxyRejection::BadGateway
            }
        })
    }
}

fn apply_tls(mut builder: reqwest::ClientBuilder, tls_config: &TlsConfig) -> Result<reqwest::ClientBuilder> {
    if !tls_config.enabled {
        return Ok(builder);
    }
    builder = builder.min_tls_version(tls::Version::TLS_1_2);

    if tls_config.insecure_skip_verify {
        warn!("TLS certificate verification disabled for proxied traffic");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(ca) = &tls_config.ca_cert {
        let pem = std::fs::read(ca)?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| Error::Config(format!("invalid CA certificate {ca}: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }
    if let (Some(cert), Some(key)) = (&tls_config.client_cert, &tls_config.client_key) {
        let mut pem = std::fs::read(cert)?;
        pem.push(b'\n');
        pem.extend(std::fs::read(key)?);
        let identity = Identity::from_pem(&pem)
            .map_err(|e| Error::Config(format!("invalid client certificate {cert}: {e}")))?;
        builder = builder.identity(identity);
    }
    Ok(builder)
}

/// Drop headers named in `Connection`; they are scoped to this hop too.
fn strip_connection_listed(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
}

/// Copy an upstream response, dropping hop-by-hop and auth-revealing headers
fn sanitize(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_connection_listed(&mut headers);
    for name in HOP_BY_HOP.iter().chain(STRIPPED_RESPONSE) {
        headers.remove(*name);
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Stage 1
async fn authenticate(state: &AppState, headers: &HeaderMap) -> std::result::Result<UserInfo, ProxyRejection> {
    match state.provider.get_user(headers, state.group_whitelist.as_deref()).await {
        Ok(user) => {
            metrics::record_authentication(true);
            Ok(user)
        }
        Err(e) => {
            metrics::record_authentication(false);
            metrics::record_error(e.kind());
            warn!(error = %e, "Proxy authentication failed");
            Err(ProxyRejection::from_error(&e))
        }
    }
}

/// Stage 2
async fn inject(state: &AppState, user: &UserInfo) -> std::result::Result<UserCredentials, ProxyRejection> {
    state.broker.resolve(user).await.map_err(|e| {
        metrics::record_error(e.kind());
        error!(username = %user.username, error = %e, "Failed to resolve credentials");
        ProxyRejection::from_error(&e)
    })
}

async fn run_pipeline(state: &AppState, request: Request) -> std::result::Result<Response, ProxyRejection> {
    let Some(forwarder) = state.proxy.as_ref() else {
        error!("Proxy mode without a configured forwarder");
        return Err(ProxyRejection::Internal);
    };

    let user = authenticate(state, request.headers()).await?;
    let creds = inject(state, &user).await?;

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let upstream = forwarder.forward(request, &creds).await?;

    info!(
        username = %user.username,
        %method,
        path = %path,
        status = upstream.status().as_u16(),
        content_length = upstream.content_length().unwrap_or_default(),
        content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default(),
        "Proxy response"
    );
    debug!(headers = %redact_headers(upstream.headers()), "Upstream response headers");

    Ok(sanitize(upstream))
}

/// Handler for every non-reserved path in proxy mode
pub async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match run_pipeline(&state, request).await {
        Ok(response) => response,
        Err(rejection) => rejection.into_response(),
    }
}
