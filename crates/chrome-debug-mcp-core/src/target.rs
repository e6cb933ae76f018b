//! Debuggable targets as reported by `Target.getTargets`.

use lazy_static::lazy_static;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref EXTENSION_URL: Regex =
        Regex::new(r"^chrome-extension://([a-p]{32})(?:/|$)").expect("valid extension url regex");
}

/// Extract the extension id from a `chrome-extension://<id>/...` URL or origin.
pub fn extension_id_from_url(url: &str) -> Option<&str> {
    EXTENSION_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Kind of a debuggable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A tab or extension page
    Page,
    /// Manifest V2 extension background page
    BackgroundPage,
    /// Service worker (Manifest V3 extension background)
    ServiceWorker,
    /// Out-of-process iframe
    Iframe,
    /// Dedicated worker
    Worker,
    /// Shared worker
    SharedWorker,
    /// The browser target itself
    Browser,
    /// Anything else
    Other,
}

impl TargetKind {
    /// Map the CDP `type` string to a kind.
    pub fn from_cdp(kind: &str) -> Self {
        match kind {
            "page" => TargetKind::Page,
            "background_page" => TargetKind::BackgroundPage,
            "service_worker" => TargetKind::ServiceWorker,
            "iframe" => TargetKind::Iframe,
            "worker" => TargetKind::Worker,
            "shared_worker" => TargetKind::SharedWorker,
            "browser" => TargetKind::Browser,
            _ => TargetKind::Other,
        }
    }
}

/// Target description as returned by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target identifier
    pub target_id: String,
    /// Raw CDP target type
    #[serde(rename = "type")]
    pub target_type: String,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Current URL
    #[serde(default)]
    pub url: String,
    /// Whether some client is attached
    #[serde(default)]
    pub attached: bool,
    /// Target that opened this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_id: Option<String>,
}

impl TargetInfo {
    /// Kind of this target.
    pub fn kind(&self) -> TargetKind {
        TargetKind::from_cdp(&self.target_type)
    }

    /// Extension owning this target, if its URL is an extension URL.
    pub fn extension_id(&self) -> Option<&str> {
        extension_id_from_url(&self.url)
    }

    /// Whether this is a page (tab or extension page).
    pub fn is_page(&self) -> bool {
        self.kind() == TargetKind::Page
    }
}

/// One open page in the attached browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageTarget {
    /// Target identifier
    pub target_id: String,
    /// URL at enumeration time
    pub url: String,
    /// Title at enumeration time
    pub title: String,
}

impl From<&TargetInfo> for PageTarget {
    fn from(info: &TargetInfo) -> Self {
        Self {
            target_id: info.target_id.clone(),
            url: info.url.clone(),
            title: info.title.clone(),
        }
    }
}

impl From<&PageTarget> for TargetInfo {
    fn from(page: &PageTarget) -> Self {
        Self {
            target_id: page.target_id.clone(),
            target_type: "page".to_string(),
            title: page.title.clone(),
            url: page.url.clone(),
            attached: false,
            opener_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXT: &str = "abcdefghijklmnopabcdefghijklmnop";

    #[test]
    fn test_extension_id_from_url() {
        let url = format!("chrome-extension://{EXT}/popup.html");
        assert_eq!(extension_id_from_url(&url), Some(EXT));
        assert_eq!(
            extension_id_from_url(&format!("chrome-extension://{EXT}")),
            Some(EXT)
        );
        assert_eq!(extension_id_from_url("https://example.com/"), None);
        assert_eq!(extension_id_from_url("chrome-extension://short/x"), None);
    }

    #[test]
    fn test_target_kind_mapping() {
        assert_eq!(TargetKind::from_cdp("page"), TargetKind::Page);
        assert_eq!(
            TargetKind::from_cdp("service_worker"),
            TargetKind::ServiceWorker
        );
        assert_eq!(
            TargetKind::from_cdp("background_page"),
            TargetKind::BackgroundPage
        );
        assert_eq!(TargetKind::from_cdp("webview"), TargetKind::Other);
    }

    #[test]
    fn test_target_info_from_cdp_json() {
        let json = serde_json::json!({
            "targetId": "T1",
            "type": "service_worker",
            "title": "Service Worker chrome-extension://x",
            "url": format!("chrome-extension://{EXT}/background.js"),
            "attached": false,
            "canAccessOpener": false,
            "browserContextId": "C1"
        });
        let info: TargetInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.kind(), TargetKind::ServiceWorker);
        assert_eq!(info.extension_id(), Some(EXT));
        assert!(!info.is_page());
    }

    #[test]
    fn test_page_target_from_info() {
        let info = TargetInfo {
            target_id: "P1".to_string(),
            target_type: "page".to_string(),
            title: "Example".to_string(),
            url: "https://example.com/".to_string(),
            attached: true,
            opener_id: None,
        };
        let page = PageTarget::from(&info);
        assert_eq!(page.target_id, "P1");
        assert_eq!(page.url, "https://example.com/");

        let back = TargetInfo::from(&page);
        assert!(back.is_page());
        assert_eq!(back.title, "Example");
    }
}
