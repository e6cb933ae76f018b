//! Page Registry: the open page targets of the attached browser.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use chrome_debug_mcp_cdp::BrowserConnection;
use chrome_debug_mcp_core::{ConnectionId, Error, PageTarget, Result};

/// Pages enumerated against one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagesSnapshot {
    /// Connection the pages were enumerated against
    pub connection_id: ConnectionId,
    /// Page targets in the browser's order
    pub pages: Vec<PageTarget>,
    /// When the enumeration completed
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    browser: Option<Arc<BrowserConnection>>,
    snapshot: Option<PagesSnapshot>,
}

/// Tracks the connection whose pages are enumerated and the last good enumeration.
///
/// Enumeration is pulled through [`PageRegistry::refresh`]; replacing the
/// connection never performs protocol I/O.
#[derive(Default)]
pub struct PageRegistry {
    inner: Mutex<RegistryInner>,
}

impl PageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the tracked connection. A different connection drops the retained pages.
    pub fn set_browser(&self, browser: Option<Arc<BrowserConnection>>) {
        let mut inner = self.lock();
        let current = inner.browser.as_ref().map(|b| b.id());
        let next = browser.as_ref().map(|b| b.id());
        if current == next {
            return;
        }
        debug!(?current, ?next, "Page registry switched connection");
        inner.browser = browser;
        inner.snapshot = None;
    }

    /// Tracked connection.
    pub fn browser(&self) -> Option<Arc<BrowserConnection>> {
        self.lock().browser.clone()
    }

    /// Last successful enumeration against the tracked connection.
    pub fn snapshot(&self) -> Option<PagesSnapshot> {
        self.lock().snapshot.clone()
    }

    /// Enumerate pages of the tracked connection.
    ///
    /// On failure the previous snapshot is kept and the error returned.
    pub async fn refresh(&self) -> Result<PagesSnapshot> {
        let browser = self.browser().ok_or(Error::NotConnected)?;

        let pages = match browser.page_targets().await {
            Ok(pages) => pages,
            Err(e) => {
                warn!("Page enumeration failed, keeping previous pages: {}", e);
                return Err(e);
            }
        };

        let snapshot = PagesSnapshot {
            connection_id: browser.id(),
            pages,
            refreshed_at: Utc::now(),
        };

        let mut inner = self.lock();
        if inner.browser.as_ref().map(|b| b.id()) == Some(snapshot.connection_id) {
            inner.snapshot = Some(snapshot.clone());
        }
        Ok(snapshot)
    }
}
