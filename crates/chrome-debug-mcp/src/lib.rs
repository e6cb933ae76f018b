//! Chrome Debug MCP Server Library
//!
//! This library contains the MCP protocol layer types, handlers and
//! command-line handling. The actual server binary is in main.rs.

pub mod cli;
pub mod protocol;
pub mod tools;

// Re-export commonly used types
pub use cli::CliArgs;
pub use protocol::ChromeDebugMcpServer;
pub use tools::*;
