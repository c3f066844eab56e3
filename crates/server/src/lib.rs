//! Prism server library.
//!
//! Provides a reusable serve function for the binary and for tests: builds
//! the router, applies authentication, binds the listener and runs until
//! shutdown.

#![deny(missing_docs)]

mod auth;
mod logger;

use std::net::SocketAddr;

use anyhow::anyhow;
use auth::AuthLayer;
use axum::Router;
use config::Config;
use http::HeaderValue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Every response names the gateway that produced it.
const PROXIED_BY_HEADER: &str = "x-proxied-by";
const PROXIED_BY_VALUE: HeaderValue = HeaderValue::from_static("prism");

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized prism TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "server=debug,llm=debug").
    pub log_filter: String,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the gateway with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    log::info!("Prism {version}");

    let llm_router = llm::router(&config).map_err(|err| {
        log::error!("Failed to initialize LLM router: {err:?}");
        anyhow!("Failed to initialize LLM router: {err}")
    })?;

    let auth = AuthLayer::new(config.server.auth.clone());

    let app = Router::new().merge(llm_router).layer(
        tower::ServiceBuilder::new()
            .layer(tower::util::MapResponseLayer::new(|mut response: axum::response::Response| {
                response.headers_mut().insert(PROXIED_BY_HEADER, PROXIED_BY_VALUE);
                response
            }))
            .layer(auth),
    );

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let bound_addr = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender
        && sender.send(bound_addr).is_err()
    {
        log::warn!("Nobody is listening for the bound address");
    }

    log::info!("OpenAI-compatible endpoint: http://{bound_addr}/v1");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}
