//! Seams between the session layer and real browsers.
//!
//! The Connection Manager only talks to a [`BrowserConnector`]; production
//! code uses [`ChromiumConnector`], tests use the scripted connector from
//! [`crate::testing`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use chrome_debug_mcp_core::{Endpoint, Error, Result};

use crate::discovery::{fetch_version, BrowserVersion};
use crate::launcher::LaunchRequest;
use crate::transport::{CdpTransport, ChromiumTransport};

/// A browser process owned by this server.
#[async_trait]
pub trait BrowserProcess: Send + Sync {
    /// Exit description once the process is gone, `None` while it runs.
    fn has_exited(&mut self) -> Option<String>;

    /// Terminate the process.
    async fn kill(&mut self) -> Result<()>;
}

/// Result of a successful handshake.
pub struct ConnectedTransport {
    /// Open protocol channel to the browser target
    pub transport: Arc<dyn CdpTransport>,
    /// Version document reported by the endpoint
    pub version: BrowserVersion,
}

impl std::fmt::Debug for ConnectedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedTransport")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Opens connections to and starts browsers.
#[async_trait]
pub trait BrowserConnector: Send + Sync {
    /// Discover the websocket of `endpoint` and open it, within `timeout`.
    ///
    /// An unreachable endpoint, a failed handshake and an expired `timeout`
    /// are all reported as `Connection` errors.
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<ConnectedTransport>;

    /// Whether something already listens on local `port`.
    async fn port_in_use(&self, port: u16) -> bool;

    /// Start a browser process configured for remote debugging.
    async fn spawn(&self, request: &LaunchRequest) -> Result<Box<dyn BrowserProcess>>;
}

/// Connector for real Chrome/Chromium browsers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumConnector;

impl ChromiumConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserConnector for ChromiumConnector {
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<ConnectedTransport> {
        let handshake = async {
            let version = fetch_version(endpoint, timeout).await?;
            debug!(
                browser = %version.browser,
                ws = %version.web_socket_debugger_url,
                "Discovered DevTools endpoint"
            );
            let transport = ChromiumTransport::connect(&version.web_socket_debugger_url).await?;
            Ok::<_, Error>(ConnectedTransport {
                transport: Arc::new(transport),
                version,
            })
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| {
                Error::connection(
                    endpoint.to_string(),
                    format!("handshake timed out after {}ms", timeout.as_millis()),
                )
            })?
    }

    async fn port_in_use(&self, port: u16) -> bool {
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(_) => false,
            Err(e) => {
                debug!(port, "Debug port not bindable: {}", e);
                e.kind() == std::io::ErrorKind::AddrInUse
            }
        }
    }

    async fn spawn(&self, request: &LaunchRequest) -> Result<Box<dyn BrowserProcess>> {
        let process = request.spawn()?;
        Ok(Box::new(process))
    }
}
