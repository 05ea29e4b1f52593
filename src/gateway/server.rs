//! Gateway server

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::router::{AppState, OperatingMode, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// elastauth HTTP server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Runtime components
    state: AppState,
}

impl Gateway {
    /// Build every component. Configuration must already be validated.
    pub async fn new(config: Config) -> Result<Self> {
        let state = AppState::from_config(&config).await?;
        Ok(Self { config, state })
    }

    /// Operating mode selected at startup
    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        self.state.mode
    }

    /// Run until Ctrl-C or SIGTERM, then drain in-flight requests
    pub async fn run(self) -> Result<()> {
        let Self { config, mut state } = self;

        #[cfg(feature = "metrics")]
        match crate::metrics::install_recorder() {
            Ok(handle) => state.metrics = Some(handle),
            Err(e) => warn!(error = %e, "Metrics disabled"),
        }

        if config.elasticsearch.dry_run {
            warn!("Elasticsearch dry run enabled, users will not be provisioned");
        } else if let Err(e) = state.broker.context().elasticsearch().ping().await {
            warn!(error = %e, "Elasticsearch connectivity check failed, continuing startup");
        }

        let mode = state.mode;
        let app = create_router(Arc::new(state));

        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| Error::Config(format!("cannot listen on {}: {e}", config.listen)))?;

        info!("============================================================");
        info!("ELASTAUTH v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(listen = %config.listen, %mode, "Listening");
        info!(
            provider = config.auth_provider.as_str(),
            cache = config.cache.cache_type.as_str(),
            ttl = ?config.cache.expiration,
            "Credential broker ready"
        );
        match mode {
            OperatingMode::AuthOnly => {
                info!("  GET http://{}/elastauth  (credentials in Authorization header)", config.listen);
            }
            OperatingMode::TransparentProxy => {
                info!(target = %config.proxy.elasticsearch_url, "  /*  proxied to Elasticsearch");
                if config.proxy.tls.enabled && config.proxy.tls.insecure_skip_verify {
                    warn!("Upstream TLS verification is disabled");
                }
            }
        }
        info!("============================================================");

        let drained =
            serve_with_deadline(listener, app, shutdown_signal(), config.shutdown_timeout).await?;
        if drained {
            info!("Server stopped");
        } else {
            info!("Server stopped, unfinished requests were dropped");
        }
        Ok(())
    }
}

/// Serve `app` until `shutdown` resolves, then let in-flight requests finish
/// for at most `grace`.
///
/// Returns `false` when the grace period ran out before every connection
/// closed.
async fn serve_with_deadline<F>(
    listener: TcpListener,
    app: Router,
    shutdown: F,
    grace: Duration,
) -> Result<bool>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut server_rx = shutdown_tx.subscribe();
    let mut drain_rx = shutdown_tx.subscribe();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_rx.recv().await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::spawn(async move {
        shutdown.await;
        let _ = shutdown_tx.send(());
    });

    tokio::select! {
        res = &mut server => {
            res.map_err(|e| Error::Internal(e.to_string()))?;
            return Ok(true);
        }
        _ = drain_rx.recv() => {}
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(res) => {
            res.map_err(|e| Error::Internal(e.to_string()))?;
            Ok(true)
        }
        Err(_) => {
            warn!(?grace, "Grace period elapsed with requests still in flight");
            Ok(false)
        }
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining requests");
}
