//! # chrome-debug-mcp-core
//!
//! Core types for the Chrome Debug MCP Server.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other chrome-debug-mcp crates. It provides:
//!
//! - Identifier types (SessionId, ConnectionId)
//! - Session and connection-health types
//! - Target types (TargetInfo, PageTarget) and extension-context kinds
//! - Extension metadata and cache entries
//! - Server configuration
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other chrome-debug-mcp crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod extension;
pub mod platform;
pub mod session;
pub mod target;

// Re-export commonly used types
pub use config::{
    ConnectionSettings, ExtensionSettings, LaunchSettings, RetryPolicy, ServerConfig,
    ServerSettings,
};
pub use error::{Error, Result};
pub use extension::{ExtensionCacheEntry, ExtensionContextType, ExtensionInfo, ExtensionTarget};
pub use platform::Platform;
pub use session::{
    ConnectionHealth, ConnectionId, Endpoint, HealthStatus, SessionId, SessionInfo,
};
pub use target::{extension_id_from_url, PageTarget, TargetInfo, TargetKind};
