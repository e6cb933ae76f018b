//! # chrome-debug-mcp-cdp
//!
//! Chrome DevTools Protocol plumbing for the Chrome Debug MCP Server.
//!
//! This crate provides:
//! - A message-level CDP transport over the browser websocket
//! - `/json/version` endpoint discovery
//! - Chrome executable detection and process launching
//! - `BrowserConnection`, the single live connection handed to the session layer
//! - Typed decoding of the events the session layer reacts to
//! - Scripted mock browsers for tests
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on chrome-debug-mcp-core
//! and is consumed by chrome-debug-mcp-session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod connector;
pub mod discovery;
pub mod events;
pub mod launcher;
pub mod testing;
pub mod transport;

// Re-export commonly used types
pub use connection::{AttachedSession, BrowserConnection, ExecutionContextInfo, TargetSessions};
pub use connector::{BrowserConnector, BrowserProcess, ChromiumConnector, ConnectedTransport};
pub use discovery::{fetch_version, BrowserVersion};
pub use events::{format_console_args, CdpEvent};
pub use launcher::{detect_chrome_executable, ChromeProcess, LaunchRequest};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
