//! # Chrome Debug MCP Server
//!
//! Model Context Protocol server for AI agents to debug Chrome pages and
//! Chrome extensions over the DevTools Protocol.
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Connection management (attach to or launch Chrome)
//! - Tab selection, navigation and JavaScript evaluation
//! - Console capture
//! - Extension discovery and extension-context evaluation
//! - Session diagnostics
//!
//! ## Architecture
//!
//! This is the top layer - the MCP server binary that ties together:
//! - chrome-debug-mcp-core: Core types and configuration
//! - chrome-debug-mcp-cdp: DevTools Protocol transport and browser launching
//! - chrome-debug-mcp-session: Connection management and session reconciliation

use rmcp::{transport::stdio, ServiceExt};

use chrome_debug_mcp::{ChromeDebugMcpServer, CliArgs};
use chrome_debug_mcp_session::McpContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse(std::env::args().skip(1))?;
    let config = args.load_config()?;

    // Initialize logging; stdout carries MCP frames
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(
        "Chrome Debug MCP Server v{} starting (launch default: {})...",
        env!("CARGO_PKG_VERSION"),
        if config.launch.headless {
            "headless"
        } else {
            "headed"
        }
    );

    let context = McpContext::with_chromium(config);
    context.start();

    let server = ChromeDebugMcpServer::new(context.clone());

    tracing::info!("Server initialized, starting stdio transport...");

    // Serve the MCP server over stdio
    let service = server.serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("Chrome Debug MCP Server running on stdio");

    // Wait for the client to disconnect or for Ctrl-C
    tokio::select! {
        result = service.waiting() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    tracing::info!("Chrome Debug MCP Server shutting down");
    context.cleanup().await;

    Ok(())
}
