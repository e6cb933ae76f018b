//! Connection Manager: owns the single live browser connection.
//!
//! Attach and launch complete a full handshake (websocket, target discovery)
//! before the new connection replaces the old one, so callers only ever see
//! a usable connection or none. Each installed connection gets two tasks:
//!
//! - an event pump that indexes sessions and execution contexts and turns
//!   console events into log lines
//! - a heartbeat that probes the browser and feeds the health tracker
//!
//! When either task sees an attached browser go away, the manager retires the
//! connection and, if configured, re-attaches to the same endpoint.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use chrome_debug_mcp_cdp::{BrowserConnection, BrowserConnector, CdpEvent, LaunchRequest};
use chrome_debug_mcp_core::{
    ConnectionHealth, ConnectionSettings, Endpoint, Error, LaunchSettings, Result,
};

use crate::health::HealthTracker;
use crate::logs::ConsoleLogBuffer;
use crate::pages::PageRegistry;

const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Caller-supplied launch options; unset fields fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Run without a visible window
    pub headless: Option<bool>,
    /// Remote-debugging port
    pub debug_port: Option<u16>,
    /// Profile directory
    pub user_data_dir: Option<PathBuf>,
    /// Browser executable
    pub executable_path: Option<PathBuf>,
    /// Unpacked extension directories to load
    pub load_extensions: Vec<PathBuf>,
}

/// Owns the browser connection, its health and the console log buffer.
pub struct ConnectionManager {
    me: Weak<ConnectionManager>,
    settings: ConnectionSettings,
    launch_settings: LaunchSettings,
    connector: Arc<dyn BrowserConnector>,
    pages: Arc<PageRegistry>,
    current: RwLock<Option<Arc<BrowserConnection>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    switching: AsyncMutex<()>,
    health: Mutex<HealthTracker>,
    logs: Mutex<ConsoleLogBuffer>,
}

impl ConnectionManager {
    /// Create a manager that notifies `pages` whenever a connection is installed.
    pub fn new(
        settings: ConnectionSettings,
        launch_settings: LaunchSettings,
        connector: Arc<dyn BrowserConnector>,
        pages: Arc<PageRegistry>,
    ) -> Arc<Self> {
        let threshold = settings.heartbeat_failure_threshold;
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            launch_settings,
            connector,
            pages,
            current: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            switching: AsyncMutex::new(()),
            health: Mutex::new(HealthTracker::new(threshold)),
            logs: Mutex::new(ConsoleLogBuffer::new()),
        })
    }

    fn health_tracker(&self) -> MutexGuard<'_, HealthTracker> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_buffer(&self) -> MutexGuard<'_, ConsoleLogBuffer> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_raw(&self) -> Option<Arc<BrowserConnection>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn is_current(&self, conn: &BrowserConnection) -> bool {
        self.current_raw().map(|c| c.id()) == Some(conn.id())
    }

    /// Attach to a running browser.
    ///
    /// Missing arguments fall back to the configured endpoint. Attaching to the
    /// endpoint of the live connection probes and reuses it. Failed handshakes
    /// are retried with exponential backoff; the previous connection stays in
    /// place until a new one is fully established.
    pub async fn attach(
        &self,
        host: Option<String>,
        port: Option<u16>,
    ) -> Result<Arc<BrowserConnection>> {
        let endpoint = Endpoint::new(
            host.unwrap_or_else(|| self.settings.default_host.clone()),
            port.unwrap_or(self.settings.default_port),
        );

        let _switch = self.switching.lock().await;

        if let Some(current) = self.browser() {
            if current.endpoint() == &endpoint {
                match current.probe().await {
                    Ok(()) => {
                        debug!(%endpoint, "Already attached, reusing connection");
                        self.health_tracker().record_success();
                        self.pages.set_browser(Some(current.clone()));
                        return Ok(current);
                    }
                    Err(e) => {
                        warn!(%endpoint, "Existing connection failed probe, reconnecting: {}", e);
                    }
                }
            }
        }

        let conn = Arc::new(self.connect_with_retry(&endpoint).await?);
        self.install(conn.clone()).await;
        Ok(conn)
    }

    async fn connect_with_retry(&self, endpoint: &Endpoint) -> Result<BrowserConnection> {
        let policy = &self.settings.retry;
        let mut attempt = 1;

        loop {
            match self.handshake(endpoint).await {
                Ok(conn) => {
                    if attempt > 1 {
                        info!(%endpoint, attempt, "Attached after retry");
                    }
                    return Ok(conn);
                }
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff_after(attempt);
                    warn!(
                        %endpoint,
                        attempt,
                        max_attempts = policy.max_attempts,
                        "Attach failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(%endpoint, attempt, "Attach failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Connect and finish session setup. A connection that fails setup is closed.
    async fn handshake(&self, endpoint: &Endpoint) -> Result<BrowserConnection> {
        let connected = self
            .connector
            .connect(endpoint, self.settings.connect_timeout())
            .await?;
        let conn = BrowserConnection::new(
            endpoint.clone(),
            connected,
            None,
            self.settings.command_timeout(),
        );

        if let Err(e) = conn.enable_target_discovery().await {
            conn.close().await;
            return Err(Error::connection(
                endpoint.to_string(),
                format!("handshake failed: {e}"),
            ));
        }
        Ok(conn)
    }

    /// Start a browser and attach to it.
    ///
    /// Fails with `Launch` when the debug port is already taken, when the
    /// process cannot be started or when it exits early,
    /// and with `Connection` when it runs but its debugging endpoint never
    /// completes a handshake within the launch timeout (the process is killed).
    pub async fn launch(&self, options: LaunchOptions) -> Result<Arc<BrowserConnection>> {
        let request = self.launch_request(options);
        let endpoint = Endpoint::new("localhost", request.debug_port);

        let _switch = self.switching.lock().await;

        if self.connector.port_in_use(request.debug_port).await {
            return Err(Error::Launch(format!(
                "debug port {} already in use",
                request.debug_port
            )));
        }

        let mut process = self.connector.spawn(&request).await?;
        let deadline = Instant::now() + request.launch_timeout;

        let connected = loop {
            if let Some(exit) = process.has_exited() {
                return Err(Error::Launch(format!(
                    "browser exited before its debugging endpoint came up: {exit}"
                )));
            }

            match self
                .connector
                .connect(&endpoint, self.settings.connect_timeout())
                .await
            {
                Ok(connected) => break connected,
                Err(e) if Instant::now() >= deadline => {
                    if let Err(kill_err) = process.kill().await {
                        warn!("Failed to terminate browser after failed handshake: {}", kill_err);
                    }
                    return Err(Error::connection(
                        endpoint.to_string(),
                        format!("browser started but handshake failed: {e}"),
                    ));
                }
                Err(e) => {
                    debug!(%endpoint, "Waiting for debugging endpoint: {}", e);
                    tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;
                }
            }
        };

        let conn = BrowserConnection::new(
            endpoint.clone(),
            connected,
            Some(process),
            self.settings.command_timeout(),
        );
        if let Err(e) = conn.enable_target_discovery().await {
            conn.close().await;
            return Err(Error::connection(
                endpoint.to_string(),
                format!("handshake failed: {e}"),
            ));
        }

        let conn = Arc::new(conn);
        self.install(conn.clone()).await;
        info!(%endpoint, browser = %conn.version().browser, "Browser launched");
        Ok(conn)
    }

    fn launch_request(&self, options: LaunchOptions) -> LaunchRequest {
        let defaults = &self.launch_settings;
        LaunchRequest {
            headless: options.headless.unwrap_or(defaults.headless),
            debug_port: options.debug_port.unwrap_or(defaults.debug_port),
            user_data_dir: options
                .user_data_dir
                .or_else(|| defaults.user_data_dir.clone()),
            executable: options
                .executable_path
                .or_else(|| defaults.executable.clone()),
            extensions: options.load_extensions,
            extra_args: defaults.extra_args.clone(),
            launch_timeout: Duration::from_millis(defaults.launch_timeout_ms),
        }
    }

    /// Make `conn` the live connection and retire the previous one.
    async fn install(&self, conn: Arc<BrowserConnection>) {
        let previous = self
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(conn.clone());

        {
            let mut health = self.health_tracker();
            health.reset();
            health.record_success();
        }
        self.restart_tasks(&conn);
        self.pages.set_browser(Some(conn.clone()));

        info!(
            connection = %conn.id(),
            endpoint = %conn.endpoint(),
            browser = %conn.version().browser,
            "Browser connection established"
        );

        if let Some(previous) = previous {
            if previous.id() != conn.id() {
                debug!(connection = %previous.id(), "Retiring previous connection");
                previous.close().await;
            }
        }
    }

    fn restart_tasks(&self, conn: &Arc<BrowserConnection>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }

        tasks.push(tokio::spawn(pump_events(self.me.clone(), conn.clone())));

        if self.settings.heartbeat_interval_ms > 0 {
            tasks.push(tokio::spawn(heartbeat(
                self.me.clone(),
                conn.clone(),
                Duration::from_millis(self.settings.heartbeat_interval_ms),
            )));
        }
    }

    /// Current live connection; never one whose transport is known closed.
    pub fn browser(&self) -> Option<Arc<BrowserConnection>> {
        self.current_raw().filter(|c| c.is_connected())
    }

    /// Current connection health.
    pub fn health(&self) -> ConnectionHealth {
        let alive = self.current_raw().map(|c| c.is_connected());
        self.health_tracker().evaluate(alive)
    }

    /// Append a timestamped console line.
    pub fn add_console_log(&self, line: &str) {
        self.log_buffer().push(line);
    }

    /// Retained console lines, oldest first.
    pub fn console_logs(&self) -> Vec<String> {
        self.log_buffer().entries()
    }

    /// Retained console lines containing `needle`.
    pub fn console_logs_matching(&self, needle: &str) -> Vec<String> {
        self.log_buffer().filtered(needle)
    }

    /// Number of retained console lines.
    pub fn console_log_count(&self) -> usize {
        self.log_buffer().len()
    }

    /// Drop all console lines.
    pub fn clear_console_logs(&self) {
        self.log_buffer().clear();
    }

    /// Handle loss of `conn` seen by one of its tasks.
    fn connection_lost(self: &Arc<Self>, conn: &Arc<BrowserConnection>, reason: &str) {
        if !self.is_current(conn) {
            return;
        }

        let reconnect = self.settings.auto_reconnect && !conn.is_launched();
        {
            let mut health = self.health_tracker();
            if health.is_reconnecting() {
                return;
            }
            health.record_failure(reason.to_string());
            health.set_reconnecting(reconnect);
        }

        warn!(connection = %conn.id(), endpoint = %conn.endpoint(), "Browser connection lost: {}", reason);

        let manager = self.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            manager.recover(conn, reconnect).await;
        });
    }

    async fn recover(self: Arc<Self>, lost: Arc<BrowserConnection>, reconnect: bool) {
        let _switch = self.switching.lock().await;

        // A caller may have attached elsewhere meanwhile.
        if !self.is_current(&lost) {
            self.health_tracker().set_reconnecting(false);
            return;
        }

        if reconnect {
            match self.connect_with_retry(lost.endpoint()).await {
                Ok(conn) => {
                    info!(endpoint = %lost.endpoint(), "Reconnected to browser");
                    self.health_tracker().set_reconnecting(false);
                    self.install(Arc::new(conn)).await;
                    return;
                }
                Err(e) => {
                    error!(endpoint = %lost.endpoint(), "Automatic reconnect failed: {}", e);
                }
            }
        }

        self.retire_current().await;
        self.health_tracker().set_reconnecting(false);
    }

    async fn retire_current(&self) {
        let previous = self
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.pages.set_browser(None);
        if let Some(conn) = previous {
            conn.close().await;
        }
    }

    /// Release the connection and terminate a launched browser. Never fails.
    pub async fn cleanup(&self) {
        let _switch = self.switching.lock().await;
        self.retire_current().await;
        self.health_tracker().reset();
        info!("Connection manager cleaned up");
    }
}

async fn pump_events(manager: Weak<ConnectionManager>, conn: Arc<BrowserConnection>) {
    while let Some(raw) = conn.next_event().await {
        let event = CdpEvent::parse(&raw);
        conn.sessions().apply(&event);

        let Some(manager) = manager.upgrade() else {
            return;
        };
        match event {
            CdpEvent::AttachedToTarget {
                session_id,
                waiting_for_debugger,
                ..
            } => {
                let conn = conn.clone();
                tokio::spawn(async move {
                    if let Err(e) = conn.send_to(&session_id, "Runtime.enable", json!({})).await {
                        debug!(session = %session_id, "Runtime.enable failed: {}", e);
                    }
                    if waiting_for_debugger {
                        let _ = conn
                            .send_to(&session_id, "Runtime.runIfWaitingForDebugger", json!({}))
                            .await;
                    }
                });
            }
            CdpEvent::ConsoleApiCalled { level, text, .. } => {
                manager.add_console_log(&format!("[{level}] {text}"));
            }
            CdpEvent::ExceptionThrown { text, .. } => {
                manager.add_console_log(&format!("[exception] {text}"));
            }
            _ => {}
        }
    }

    debug!(connection = %conn.id(), "Event stream ended");
    if let Some(manager) = manager.upgrade() {
        manager.connection_lost(&conn, "event stream closed");
    }
}

async fn heartbeat(manager: Weak<ConnectionManager>, conn: Arc<BrowserConnection>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(manager) = manager.upgrade() else {
            return;
        };

        if let Some(exit) = conn.process_exit().await {
            manager.connection_lost(&conn, &exit);
            return;
        }
        if !conn.is_connected() {
            manager.connection_lost(&conn, "browser transport closed");
            return;
        }

        match conn.probe().await {
            Ok(()) => manager.health_tracker().record_success(),
            Err(e) => {
                debug!(connection = %conn.id(), "Heartbeat failed: {}", e);
                manager.health_tracker().record_failure(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrome_debug_mcp_cdp::testing::{MockBrowser, MockConnector};
    use chrome_debug_mcp_core::{HealthStatus, RetryPolicy};

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            heartbeat_interval_ms: 0,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            },
            ..Default::default()
        }
    }

    fn manager_with(connector: Arc<MockConnector>) -> Arc<ConnectionManager> {
        ConnectionManager::new(
            settings(),
            LaunchSettings::default(),
            connector,
            Arc::new(PageRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_attach_uses_configured_defaults() {
        let connector = Arc::new(MockConnector::new(MockBrowser::new()));
        let manager = manager_with(connector.clone());

        let conn = manager.attach(None, None).await.unwrap();
        assert_eq!(conn.endpoint(), &Endpoint::new("localhost", 9222));
        assert!(manager.health().is_healthy());
    }

    #[tokio::test]
    async fn test_attach_exhausts_retries() {
        let connector = Arc::new(MockConnector::new(MockBrowser::new()));
        connector.set_unreachable(true);
        let manager = manager_with(connector.clone());

        let err = manager.attach(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(connector.connect_attempts(), 3);
        assert!(manager.browser().is_none());
        assert_eq!(manager.health().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_launch_request_merges_defaults() {
        let connector = Arc::new(MockConnector::new(MockBrowser::new()));
        let manager = manager_with(connector);

        let request = manager.launch_request(LaunchOptions {
            debug_port: Some(9333),
            load_extensions: vec![PathBuf::from("/tmp/ext")],
            ..Default::default()
        });
        assert!(!request.headless);
        assert_eq!(request.debug_port, 9333);
        assert_eq!(request.extensions, vec![PathBuf::from("/tmp/ext")]);
        assert_eq!(request.launch_timeout, Duration::from_millis(20_000));
    }

    #[tokio::test]
    async fn test_console_logs_roundtrip() {
        let manager = manager_with(Arc::new(MockConnector::new(MockBrowser::new())));
        manager.add_console_log("[log] hi");
        assert_eq!(manager.console_log_count(), 1);
        assert_eq!(manager.console_logs_matching("HI").len(), 1);
        manager.clear_console_logs();
        assert!(manager.console_logs().is_empty());
    }
}
