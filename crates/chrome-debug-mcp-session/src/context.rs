//! `McpContext`: the process-wide aggregator and its reconciliation loop.
//!
//! Session state lives behind one lock. Two kinds of writers exist:
//!
//! - tool handlers, through the methods below
//! - the reconciliation task, which on every tick adopts the manager's
//!   current connection, copies its health and stamps activity
//!
//! Adopting a connection resets pages and selection in the same write, and a
//! page enumeration is only installed if it was taken against the connection
//! that is adopted at install time. Readers therefore never see pages of one
//! browser next to another browser.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chrome_debug_mcp_cdp::{BrowserConnection, BrowserConnector, ChromiumConnector};
use chrome_debug_mcp_core::{
    ConnectionHealth, Error, ExtensionCacheEntry, ExtensionContextType, ExtensionInfo, PageTarget,
    Result, ServerConfig, SessionInfo, TargetInfo,
};

use crate::extensions::{ExtensionContext, ExtensionContextTracker};
use crate::manager::{ConnectionManager, LaunchOptions};
use crate::pages::PageRegistry;
use crate::state::SessionState;

/// Floor for the reconciliation period; `tokio::time::interval` rejects zero.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(10);

/// Session diagnostics as reported to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDiagnostics {
    /// Session summary
    pub session_info: SessionInfo,
    /// Whether an adopted connection is usable
    pub browser_connected: bool,
    /// Number of known pages
    pub pages_count: usize,
    /// Number of cached extensions
    pub extensions_cached: usize,
    /// Number of retained console lines
    pub console_logs: usize,
    /// Detailed connection health
    pub connection_health: ConnectionHealth,
}

/// Process-wide aggregator over the Connection Manager and Page Registry.
pub struct McpContext {
    config: ServerConfig,
    manager: Arc<ConnectionManager>,
    pages: Arc<PageRegistry>,
    state: RwLock<SessionState>,
    refresh_in_flight: AtomicBool,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
}

impl McpContext {
    /// Create a context that reaches browsers through `connector`.
    pub fn new(config: ServerConfig, connector: Arc<dyn BrowserConnector>) -> Arc<Self> {
        let pages = Arc::new(PageRegistry::new());
        let manager = ConnectionManager::new(
            config.connection.clone(),
            config.launch.clone(),
            connector,
            pages.clone(),
        );
        Arc::new(Self {
            config,
            manager,
            pages,
            state: RwLock::new(SessionState::new()),
            refresh_in_flight: AtomicBool::new(false),
            reconcile_task: Mutex::new(None),
        })
    }

    /// Create a context talking to real Chrome/Chromium browsers.
    pub fn with_chromium(config: ServerConfig) -> Arc<Self> {
        Self::new(config, Arc::new(ChromiumConnector::new()))
    }

    /// The Connection Manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the periodic reconciliation task. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self
            .reconcile_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self
            .config
            .server
            .reconcile_interval()
            .max(MIN_RECONCILE_INTERVAL);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(context) = weak.upgrade() else {
                    break;
                };
                context.reconcile_once().await;
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Session reconciliation started");
    }

    /// One reconciliation tick.
    ///
    /// Adopts a changed connection (resetting pages in the same write), copies
    /// health and stamps activity. A page refresh is started in the background
    /// and never awaited here.
    pub async fn reconcile_once(self: &Arc<Self>) {
        let live = self.manager.browser();
        let health = self.manager.health();

        let connected = {
            let mut state = self.state.write().await;
            let live_id = live.as_ref().map(|b| b.id());
            if state.browser_id() != live_id {
                match &live {
                    Some(conn) => info!(connection = %conn.id(), "Adopting browser connection"),
                    None => info!("Browser connection gone"),
                }
                state.adopt_browser(live.clone());
                self.pages.set_browser(live.clone());
            }
            state.connection_health = health.status;
            state.last_activity = Utc::now();
            state.browser.is_some()
        };

        if connected {
            self.spawn_page_refresh();
        }
    }

    fn spawn_page_refresh(self: &Arc<Self>) {
        if self.refresh_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let context = self.clone();
        tokio::spawn(async move {
            if let Err(e) = context.refresh_pages().await {
                debug!("Background page refresh failed: {}", e);
            }
            context.refresh_in_flight.store(false, Ordering::Release);
        });
    }

    /// Re-enumerate pages now. Returns the number of known pages.
    ///
    /// On failure the previous pages stay in place.
    pub async fn refresh_pages(&self) -> Result<usize> {
        let snapshot = self.pages.refresh().await?;
        let mut state = self.state.write().await;
        if state.browser_id() == Some(snapshot.connection_id) {
            state.set_pages(snapshot.connection_id, snapshot.pages);
        } else {
            debug!("Discarding page list of a connection that is no longer adopted");
        }
        Ok(state.pages.len())
    }

    /// Consistent copy of the session state.
    pub async fn get_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Selected page, clamped into range; `None` without pages.
    pub async fn get_current_page(&self) -> Option<PageTarget> {
        self.state.read().await.current_page().cloned()
    }

    /// Select a page by index. Out-of-range indexes leave the selection unchanged.
    pub async fn set_selected_page_index(&self, index: usize) -> bool {
        let mut state = self.state.write().await;
        let accepted = state.select_page(index);
        if accepted {
            state.last_activity = Utc::now();
        } else {
            debug!(index, pages = state.pages.len(), "Ignoring out-of-range page selection");
        }
        accepted
    }

    /// Store extension metadata, replacing any previous entry.
    pub async fn update_extension_cache(
        &self,
        id: &str,
        data: ExtensionInfo,
    ) -> ExtensionCacheEntry {
        let entry = ExtensionCacheEntry::new(data);
        self.state
            .write()
            .await
            .extension_cache
            .insert(id.to_string(), entry.clone());
        entry
    }

    /// Cached metadata of one extension.
    pub async fn extension_cache_entry(&self, id: &str) -> Option<ExtensionCacheEntry> {
        self.state.read().await.extension_cache.get(id).cloned()
    }

    /// Append a timestamped console line.
    pub fn add_console_log(&self, line: &str) {
        self.manager.add_console_log(line);
    }

    /// Retained console lines, optionally only those containing `filter`.
    pub fn console_logs(&self, filter: Option<&str>) -> Vec<String> {
        match filter {
            Some(needle) if !needle.is_empty() => self.manager.console_logs_matching(needle),
            _ => self.manager.console_logs(),
        }
    }

    /// Drop all console lines.
    pub fn clear_console_logs(&self) {
        self.manager.clear_console_logs();
    }

    /// Whether the adopted connection exists and is usable.
    pub async fn is_browser_connected(&self) -> bool {
        self.state
            .read()
            .await
            .browser
            .as_ref()
            .map_or(false, |b| b.is_connected())
    }

    /// Attach to a running browser and adopt the connection.
    pub async fn attach(
        self: &Arc<Self>,
        host: Option<String>,
        port: Option<u16>,
    ) -> Result<Arc<BrowserConnection>> {
        let conn = self.manager.attach(host, port).await?;
        self.adopt_now().await;
        Ok(conn)
    }

    /// Launch a browser and adopt the connection.
    pub async fn launch(self: &Arc<Self>, options: LaunchOptions) -> Result<Arc<BrowserConnection>> {
        let conn = self.manager.launch(options).await?;
        self.adopt_now().await;
        Ok(conn)
    }

    async fn adopt_now(self: &Arc<Self>) {
        self.reconcile_once().await;
        if let Err(e) = self.refresh_pages().await {
            warn!("Initial page enumeration failed: {}", e);
        }
    }

    /// Adopted connection, or `NotConnected`.
    pub async fn connected_browser(&self) -> Result<Arc<BrowserConnection>> {
        self.state
            .read()
            .await
            .browser
            .clone()
            .filter(|b| b.is_connected())
            .ok_or(Error::NotConnected)
    }

    /// Select tab `index` and bring it to the front.
    pub async fn switch_tab(&self, index: usize) -> Result<PageTarget> {
        if let Err(e) = self.refresh_pages().await {
            debug!("Page refresh before tab switch failed: {}", e);
        }
        let conn = self.connected_browser().await?;

        let page = {
            let mut state = self.state.write().await;
            if !state.select_page(index) {
                return Err(Error::TargetNotFound(format!(
                    "no tab at index {index} ({} open)",
                    state.pages.len()
                )));
            }
            state.last_activity = Utc::now();
            state.current_page().cloned()
        }
        .ok_or_else(|| Error::TargetNotFound(format!("no tab at index {index}")))?;

        if let Err(e) = conn
            .send("Target.activateTarget", json!({ "targetId": page.target_id }))
            .await
        {
            debug!(target = %page.target_id, "Could not activate tab: {}", e);
        }
        Ok(page)
    }

    async fn current_page_session(&self) -> Result<(Arc<BrowserConnection>, PageTarget, String)> {
        let conn = self.connected_browser().await?;
        if self.get_current_page().await.is_none() {
            self.refresh_pages().await?;
        }
        let page = self
            .get_current_page()
            .await
            .ok_or_else(|| Error::TargetNotFound("no open page".to_string()))?;
        let session = conn.attach_session(&TargetInfo::from(&page)).await?;
        Ok((conn, page, session))
    }

    /// Navigate the selected page.
    pub async fn navigate(&self, url: &str) -> Result<PageTarget> {
        let (conn, page, session) = self.current_page_session().await?;
        let result = conn
            .send_to(&session, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            return Err(Error::Protocol {
                method: "Page.navigate".to_string(),
                message: error_text.to_string(),
            });
        }
        info!(target = %page.target_id, %url, "Navigated");
        Ok(PageTarget {
            url: url.to_string(),
            ..page
        })
    }

    /// Evaluate JavaScript in the selected page.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let (conn, _, session) = self.current_page_session().await?;
        conn.evaluate(&session, expression, None).await
    }

    /// Make `(extension_id, context_type)` the target of extension-scoped operations.
    ///
    /// On failure the current extension context is left unchanged.
    pub async fn switch_extension_context(
        &self,
        extension_id: &str,
        context_type: ExtensionContextType,
    ) -> Result<ExtensionContext> {
        let conn = self.connected_browser().await?;
        let preferred = self.get_current_page().await.map(|p| p.target_id);

        let context = ExtensionContextTracker::new(conn.clone())
            .resolve(extension_id, context_type, preferred.as_deref())
            .await?;

        let mut state = self.state.write().await;
        if state.browser_id() != Some(conn.id()) {
            return Err(Error::connection(
                conn.endpoint().to_string(),
                "browser connection changed during context switch",
            ));
        }
        state.current_extension = Some(context.clone());
        state.last_activity = Utc::now();
        info!(extension = %extension_id, %context_type, "Switched extension context");
        Ok(context)
    }

    /// Extension context targeted by extension-scoped operations.
    pub async fn current_extension_context(&self) -> Option<ExtensionContext> {
        self.state.read().await.current_extension.clone()
    }

    /// Evaluate JavaScript in the current extension context.
    pub async fn evaluate_in_extension(&self, expression: &str) -> Result<Value> {
        let context = self.current_extension_context().await.ok_or_else(|| {
            Error::InvalidInput(
                "no extension context selected; call switch_extension_context first".to_string(),
            )
        })?;
        let conn = self.connected_browser().await?;
        conn.evaluate(
            &context.session_id,
            expression,
            context.target.execution_context_id,
        )
        .await
    }

    /// Installed extensions.
    ///
    /// Served from the cache while the last live enumeration is younger than
    /// the configured TTL; otherwise enumerated live and cached. Extensions
    /// cached earlier but missing from the latest enumeration are reported
    /// with `enabled: false` when `include_disabled` is set.
    pub async fn list_extensions(&self, include_disabled: bool) -> Result<Vec<ExtensionInfo>> {
        let ttl_ms = self.config.extensions.cache_ttl_ms;
        let now = Utc::now();

        let fresh = {
            let state = self.state.read().await;
            state.extensions_enumerated_at.map_or(false, |at| {
                let age = now.signed_duration_since(at).num_milliseconds();
                age >= 0 && (age as u64) < ttl_ms
            })
        };

        if !fresh {
            let conn = self.connected_browser().await?;
            let live = ExtensionContextTracker::new(conn.clone()).enumerate().await?;

            let mut state = self.state.write().await;
            if state.browser_id() == Some(conn.id()) {
                for entry in state.extension_cache.values_mut() {
                    if entry.data.enabled {
                        *entry = ExtensionCacheEntry::new(ExtensionInfo {
                            enabled: false,
                            ..entry.data.clone()
                        });
                    }
                }
                for info in live {
                    state
                        .extension_cache
                        .insert(info.id.clone(), ExtensionCacheEntry::new(info));
                }
                state.extensions_enumerated_at = Some(Utc::now());
                debug!(
                    cached = state.extension_cache.len(),
                    "Extension cache refreshed"
                );
            }
        }

        let state = self.state.read().await;
        let mut extensions: Vec<ExtensionInfo> = state
            .extension_cache
            .values()
            .filter(|entry| include_disabled || entry.data.enabled)
            .map(|entry| entry.data.clone())
            .collect();
        extensions.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(extensions)
    }

    /// Session summary.
    pub async fn session_info(&self) -> SessionInfo {
        self.state.read().await.info()
    }

    /// Session diagnostics.
    pub async fn diagnostics(&self) -> SessionDiagnostics {
        let state = self.state.read().await;
        SessionDiagnostics {
            session_info: state.info(),
            browser_connected: state.browser.as_ref().map_or(false, |b| b.is_connected()),
            pages_count: state.pages.len(),
            extensions_cached: state.extension_cache.len(),
            console_logs: self.manager.console_log_count(),
            connection_health: self.manager.health(),
        }
    }

    /// Tear everything down: stop reconciliation, clear caches and logs, then
    /// release the browser. Never fails.
    pub async fn cleanup(&self) {
        if let Some(task) = self
            .reconcile_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }

        {
            let mut state = self.state.write().await;
            state.extension_cache.clear();
            state.extensions_enumerated_at = None;
            state.adopt_browser(None);
        }
        self.manager.clear_console_logs();
        self.pages.set_browser(None);
        self.manager.cleanup().await;
        info!("Session cleaned up");
    }
}

impl Drop for McpContext {
    fn drop(&mut self) {
        if let Some(task) = self
            .reconcile_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrome_debug_mcp_cdp::testing::{MockBrowser, MockConnector};
    use chrome_debug_mcp_core::HealthStatus;

    fn context(browser: &MockBrowser) -> Arc<McpContext> {
        let mut config = ServerConfig::default();
        config.connection.heartbeat_interval_ms = 0;
        McpContext::new(config, Arc::new(MockConnector::new(browser.clone())))
    }

    #[tokio::test]
    async fn test_initial_state() {
        let ctx = context(&MockBrowser::new());
        let state = ctx.get_state().await;
        assert!(state.browser.is_none());
        assert!(state.pages.is_empty());
        assert!(!ctx.is_browser_connected().await);
        assert!(ctx.get_current_page().await.is_none());
    }

    #[tokio::test]
    async fn test_start_with_zero_interval_keeps_reconciling() {
        let browser = MockBrowser::new();
        let mut config = ServerConfig::default();
        config.connection.heartbeat_interval_ms = 0;
        config.server.reconcile_interval_ms = 0;
        let ctx = McpContext::new(config, Arc::new(MockConnector::new(browser)));

        ctx.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let finished = ctx
            .reconcile_task
            .lock()
            .unwrap()
            .as_ref()
            .map(|task| task.is_finished());
        assert_eq!(finished, Some(false));
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_reconcile_copies_health_and_stamps_activity() {
        let ctx = context(&MockBrowser::new());
        let before = ctx.get_state().await.last_activity;
        ctx.reconcile_once().await;
        let state = ctx.get_state().await;
        assert_eq!(state.connection_health, HealthStatus::Unhealthy);
        assert!(state.last_activity >= before);
    }

    #[tokio::test]
    async fn test_update_extension_cache_roundtrip() {
        let ctx = context(&MockBrowser::new());
        let before = Utc::now();
        let mut info = ExtensionInfo::new("abc", "Demo");
        info.version = Some("2.0".to_string());
        ctx.update_extension_cache("abc", info.clone()).await;

        let entry = ctx.extension_cache_entry("abc").await.unwrap();
        assert_eq!(entry.data, info);
        assert!(entry.last_updated >= before);
    }

    #[tokio::test]
    async fn test_evaluate_in_extension_requires_context() {
        let ctx = context(&MockBrowser::new());
        let err = ctx.evaluate_in_extension("1 + 1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_operations_without_browser_are_not_connected() {
        let ctx = context(&MockBrowser::new());
        assert!(matches!(ctx.evaluate("1").await, Err(Error::NotConnected)));
        assert!(matches!(
            ctx.list_extensions(false).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            ctx.switch_extension_context("abc", ExtensionContextType::Popup)
                .await,
            Err(Error::NotConnected)
        ));
    }
}
