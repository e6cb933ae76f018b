//! Session state snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use chrome_debug_mcp_cdp::BrowserConnection;
use chrome_debug_mcp_core::{
    ConnectionId, ExtensionCacheEntry, HealthStatus, PageTarget, SessionId, SessionInfo,
};

use crate::extensions::ExtensionContext;

/// Process-wide session state.
///
/// `pages` are always enumerated against `pages_connection`, which is either
/// `None` or the id of `browser`; both are written together.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Session identifier
    pub session_id: SessionId,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Last reconciliation or handler activity
    pub last_activity: DateTime<Utc>,
    /// Health copied from the Connection Manager
    pub connection_health: HealthStatus,
    /// Adopted browser connection
    pub browser: Option<Arc<BrowserConnection>>,
    /// Page targets of `browser`
    pub pages: Vec<PageTarget>,
    /// Connection `pages` were enumerated against
    pub pages_connection: Option<ConnectionId>,
    /// Selected offset into `pages`
    pub selected_page_index: usize,
    /// Extension metadata by extension id
    pub extension_cache: HashMap<String, ExtensionCacheEntry>,
    /// When the extension cache was last filled from a live enumeration
    pub extensions_enumerated_at: Option<DateTime<Utc>>,
    /// Target of extension-scoped operations
    pub current_extension: Option<ExtensionContext>,
}

impl SessionState {
    /// Fresh state for a new session.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            created_at: now,
            last_activity: now,
            connection_health: HealthStatus::Unhealthy,
            browser: None,
            pages: Vec::new(),
            pages_connection: None,
            selected_page_index: 0,
            extension_cache: HashMap::new(),
            extensions_enumerated_at: None,
            current_extension: None,
        }
    }

    /// Id of the adopted connection.
    pub fn browser_id(&self) -> Option<ConnectionId> {
        self.browser.as_ref().map(|b| b.id())
    }

    /// Adopt a different connection: pages, selection and the extension
    /// context of the previous one are dropped in the same write.
    pub fn adopt_browser(&mut self, browser: Option<Arc<BrowserConnection>>) {
        self.pages_connection = browser.as_ref().map(|b| b.id());
        self.browser = browser;
        self.pages.clear();
        self.selected_page_index = 0;
        self.current_extension = None;
        self.extensions_enumerated_at = None;
    }

    /// Install pages enumerated against `connection_id` and clamp the selection.
    pub fn set_pages(&mut self, connection_id: ConnectionId, pages: Vec<PageTarget>) {
        self.pages_connection = Some(connection_id);
        self.pages = pages;
        self.selected_page_index = if self.pages.is_empty() {
            0
        } else {
            self.selected_page_index.min(self.pages.len() - 1)
        };
    }

    /// Selected page, clamped into range; `None` when there are no pages.
    pub fn current_page(&self) -> Option<&PageTarget> {
        let last = self.pages.len().checked_sub(1)?;
        self.pages.get(self.selected_page_index.min(last))
    }

    /// Select page `index`; out-of-range values are ignored.
    pub fn select_page(&mut self, index: usize) -> bool {
        if index < self.pages.len() {
            self.selected_page_index = index;
            true
        } else {
            false
        }
    }

    /// Seconds since the session was created.
    pub fn uptime_secs(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.created_at)
            .num_seconds()
            .max(0) as u64
    }

    /// Serializable session summary.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            uptime: self.uptime_secs(Utc::now()),
            last_activity: self.last_activity,
            connection_health: self.connection_health,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(n: usize) -> Vec<PageTarget> {
        (0..n)
            .map(|i| PageTarget {
                target_id: format!("P{i}"),
                url: format!("https://example.com/{i}"),
                title: format!("Page {i}"),
            })
            .collect()
    }

    #[test]
    fn test_current_page_empty() {
        let mut state = SessionState::new();
        assert!(state.current_page().is_none());
        state.selected_page_index = 7;
        assert!(state.current_page().is_none());
    }

    #[test]
    fn test_select_page_out_of_range_is_ignored() {
        let mut state = SessionState::new();
        state.set_pages(ConnectionId::new(), pages(3));
        assert!(state.select_page(1));
        assert!(!state.select_page(3));
        assert_eq!(state.selected_page_index, 1);
        assert_eq!(state.current_page().unwrap().target_id, "P1");
    }

    #[test]
    fn test_shrinking_pages_clamps_selection() {
        let mut state = SessionState::new();
        let conn = ConnectionId::new();
        state.set_pages(conn, pages(6));
        assert!(state.select_page(5));

        state.set_pages(conn, pages(3));
        assert_eq!(state.selected_page_index, 2);
        assert_eq!(state.current_page().unwrap().target_id, "P2");
    }

    #[test]
    fn test_adopt_browser_resets_pages() {
        let mut state = SessionState::new();
        state.set_pages(ConnectionId::new(), pages(2));
        state.select_page(1);
        state.adopt_browser(None);
        assert!(state.pages.is_empty());
        assert!(state.pages_connection.is_none());
        assert_eq!(state.selected_page_index, 0);
    }

    #[test]
    fn test_info() {
        let state = SessionState::new();
        let info = state.info();
        assert_eq!(info.session_id, state.session_id);
        assert_eq!(info.connection_health, HealthStatus::Unhealthy);
    }
}
