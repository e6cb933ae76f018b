//! Testing utilities for Chrome Debug MCP.
//!
//! Provides a scripted in-memory browser plus transport, connector and
//! process doubles, so session behavior can be exercised without Chrome.

pub mod mock;

pub use mock::{MockBrowser, MockConnector, MockProcess, MockTransport};
