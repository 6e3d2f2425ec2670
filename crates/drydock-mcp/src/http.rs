//! Streamable HTTP transport for remote AI agents.
//!
//! Exposes the MCP protocol via rmcp's StreamableHttpService next to a
//! couple of plain endpoints.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - JSON-RPC requests
//! - `GET /mcp` - SSE stream for server-initiated messages
//! - `GET /health` - Health check with pool occupancy
//! - `GET /` - Server info

use crate::server::DrydockServer;
use axum::{
    extract::State,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router for the MCP server.
pub fn build_router(server: DrydockServer) -> Router {
    tracing::debug!("Building HTTP router");

    let session_manager = Arc::new(LocalSessionManager::default());

    let mcp_server = server.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp_server.clone()),
        session_manager,
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .with_state(server)
        // Everything else is MCP.
        .fallback_service(mcp_service)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint.
async fn health_handler(State(server): State<DrydockServer>) -> impl IntoResponse {
    tracing::trace!("Health check request");
    let status = server.pool().status();
    Json(serde_json::json!({
        "status": if status.closed { "shutting_down" } else { "healthy" },
        "service": "drydock-mcp",
        "units": {
            "max": status.max_units,
            "busy": status.busy,
            "available": status.available,
        }
    }))
}

/// Root endpoint with server info.
async fn root_handler() -> impl IntoResponse {
    tracing::trace!("Root page request");
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Drydock MCP Server</title>
    <style>
        body { font-family: system-ui; max-width: 800px; margin: 50px auto; padding: 20px; }
        code { background: #f4f4f4; padding: 2px 6px; border-radius: 3px; }
        pre { background: #f4f4f4; padding: 16px; border-radius: 6px; overflow-x: auto; }
    </style>
</head>
<body>
    <h1>Drydock MCP Server</h1>
    <p>Model Context Protocol server running Python code in pooled, isolated containers.</p>

    <h2>Endpoints</h2>
    <ul>
        <li><code>POST /mcp</code> - MCP JSON-RPC requests</li>
        <li><code>GET /mcp</code> - SSE stream for server messages</li>
        <li><code>GET /health</code> - Health check</li>
    </ul>

    <h2>Example</h2>
    <pre>curl -X POST http://localhost:8080/mcp \
  -H "Content-Type: application/json" \
  -d '{"jsonrpc":"2.0","id":1,"method":"tools/list"}'</pre>

    <h2>Available Tools</h2>
    <ul>
        <li><code>execute_python</code> - Run Python code in a container</li>
        <li><code>list_directory</code> - List code directory contents</li>
        <li><code>read_file</code> - Read a file</li>
        <li><code>write_file</code> - Write a file</li>
        <li><code>delete_file</code> - Delete a file</li>
        <li><code>get_directory_tree</code> - Show the directory tree</li>
        <li><code>cleanup_code_directory</code> - Empty the code directory</li>
        <li><code>pool_status</code> - Execution unit occupancy</li>
    </ul>
</body>
</html>"#,
    )
}

/// Start the HTTP server.
///
/// Runs until `shutdown` resolves.
pub async fn serve(
    server: DrydockServer,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(server);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
