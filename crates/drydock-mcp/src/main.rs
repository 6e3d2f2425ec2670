//! Drydock MCP Server entry point.
//!
//! Starts the MCP server over stdio by default, suitable for local AI tools.
//! HTTP can be enabled for remote agents.
//!
//! ## Transport Modes
//!
//! - **stdio** (default): Only stdio transport
//! - **http**: Only streamable HTTP transport
//! - **both**: Runs stdio + HTTP simultaneously

use drydock_core::DockerRuntime;
use drydock_mcp::{http, DrydockConfig, DrydockServer, TransportMode};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the stdio transport.
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("drydock_mcp=info".parse()?)
                .add_directive("drydock_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Drydock MCP Server");

    let config = DrydockConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate_warn();

    let runtime = DockerRuntime::connect()?;
    if let Err(e) = runtime.ping().await {
        // Not fatal: file tools still work and execution reports the error.
        tracing::warn!(error = %e, "Docker daemon not reachable, execution will fail until it is");
    }

    let server = DrydockServer::new(config.clone(), Arc::new(runtime))?;
    server.start().await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::new();

    // HTTP transport
    if config.transport_mode.http_enabled() {
        let http_server = server.clone();
        let http_addr = config.http_addr;
        let mut shutdown_rx = shutdown_tx.subscribe();

        let http_handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
            };

            if let Err(e) = http::serve(http_server, http_addr, shutdown).await {
                tracing::error!(error = %e, "HTTP server error");
            }
        });

        handles.push(http_handle);
        tracing::info!(addr = %config.http_addr, "HTTP transport enabled");
    }

    // Stdio transport
    if config.transport_mode.stdio_enabled() {
        let stdio_server = server.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        let stdio_handle = tokio::spawn(async move {
            match stdio_server.serve(stdio()).await {
                Ok(service) => {
                    tokio::select! {
                        result = service.waiting() => {
                            if let Err(e) = result {
                                tracing::error!(error = %e, "Stdio service error");
                            }
                        }
                        _ = async { shutdown_rx.recv().await } => {
                            tracing::info!("Stdio transport shutting down");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start stdio transport");
                }
            }
        });

        handles.push(stdio_handle);
        tracing::info!("Stdio transport enabled");
    }

    match config.transport_mode {
        TransportMode::Both => {
            tracing::info!(http_addr = %config.http_addr, "Server ready (stdio + HTTP)");
        }
        TransportMode::Http => {
            tracing::info!(http_addr = %config.http_addr, "Server ready (HTTP only)");
        }
        TransportMode::Stdio => {
            tracing::info!("Server ready (stdio only)");
        }
    }

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    let _ = shutdown_tx.send(());

    let report = server.shutdown().await;
    tracing::info!(
        destroyed = report.destroyed,
        reaper_stopped = report.reaper_stopped,
        "Execution units cleaned up"
    );

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
