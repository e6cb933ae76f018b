//! # chrome-debug-mcp-session
//!
//! Connection and session management for the Chrome Debug MCP Server.
//!
//! This crate provides:
//! - The Connection Manager (attach, launch, heartbeat, auto-reconnect)
//! - Connection health tracking and the console log buffer
//! - The Page Registry and extension-context resolution
//! - `McpContext`, the process-wide aggregator and its reconciliation loop
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on chrome-debug-mcp-core
//! and chrome-debug-mcp-cdp, and is consumed by the MCP server binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod extensions;
pub mod health;
pub mod logs;
pub mod manager;
pub mod pages;
pub mod state;

// Re-export commonly used types
pub use context::{McpContext, SessionDiagnostics};
pub use extensions::{ExtensionContext, ExtensionContextTracker};
pub use health::HealthTracker;
pub use logs::{ConsoleLogBuffer, MAX_CONSOLE_LOGS};
pub use manager::{ConnectionManager, LaunchOptions};
pub use pages::{PageRegistry, PagesSnapshot};
pub use state::SessionState;
