//! Tingly server library.
//!
//! Provides a reusable serve function used by the binary and by
//! integration tests: mounts the gateway's client and management routers,
//! wires logging, auth, health, and graceful shutdown.

#![deny(missing_docs)]

mod auth;
mod logger;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::routing::get;
use config::Config;
use gateway::Gateway;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Configuration for serving Tingly.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// The deserialized gateway configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (for example `info` or `gateway=debug`).
    pub log_filter: String,
    /// Version string logged on startup.
    pub version: String,
    /// Optional oneshot sender receiving the bound address (useful when
    /// port 0 was requested).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the server with the provided configuration.
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

    log::info!("Tingly {version}");

    config.validate()?;

    if !config.has_enabled_providers() {
        log::warn!("No enabled providers configured; every request will fail routing");
    }

    let management = config.server.management.clone();
    let health = config.server.health.clone();

    let gateway = Gateway::in_memory(config);

    let mut app = gateway::client_router(Arc::clone(&gateway));

    if management.enabled {
        match management.jwt_secret.as_ref() {
            Some(secret) => {
                let protected = auth::protect(gateway::management_router(Arc::clone(&gateway)), secret);
                app = app.nest("/api", protected);

                log::info!("Management API: http://{listen_address}/api");
            }
            None => {
                log::warn!("Management API enabled without a jwt_secret; not exposing it");
            }
        }
    }

    if health.enabled {
        app = app.route(&health.path, get(|| async { "OK" }));
    }

    let app = app.layer(CorsLayer::permissive());

    let app = if debug_wire_logging() {
        app.layer(axum::middleware::from_fn(log_requests))
    } else {
        app
    };

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .map_err(|_| anyhow!("Failed to send back the bound address"))?;
    }

    log::info!("OpenAI endpoint: http://{listen_address}/openai/v1/chat/completions");
    log::info!("Anthropic endpoint: http://{listen_address}/anthropic/v1/messages");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(|e| anyhow!("Server failed: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}

/// Wire-level request logging, gated on the `TINGLY_DEBUG` environment
/// variable.
fn debug_wire_logging() -> bool {
    std::env::var("TINGLY_DEBUG").is_ok_and(|value| !value.is_empty() && value != "0")
}

async fn log_requests(request: axum::extract::Request, next: axum::middleware::Next) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    log::debug!("{method} {uri} -> {}", response.status());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_health_and_shuts_down_gracefully() {
        let shutdown = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(serve(ServeConfig {
            listen_address: "127.0.0.1:0".parse().unwrap(),
            config: Config::default(),
            shutdown_signal: shutdown.clone(),
            log_filter: "info".to_string(),
            version: "test".to_string(),
            bound_addr_sender: Some(tx),
        }));

        let address = rx.await.unwrap();

        let body = reqwest_free_get(address, "/health").await;
        assert_eq!(body, "OK");

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    // Minimal HTTP GET without pulling a client crate into dev-deps.
    async fn reqwest_free_get(address: SocketAddr, path: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        raw.split("\r\n\r\n").nth(1).unwrap_or_default().to_string()
    }
}
