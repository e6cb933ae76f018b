//! DevTools endpoint discovery through `/json/version`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use chrome_debug_mcp_core::{Endpoint, Error, Result};

/// `/json/version` response subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserVersion {
    /// Product string, e.g. `Chrome/126.0.6478.126`
    #[serde(rename = "Browser", default)]
    pub browser: String,
    /// DevTools protocol version
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    /// User agent of the browser
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    /// Browser-level websocket URL
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Fetch the version document of `endpoint`.
///
/// The websocket URL is rewritten to the host that was actually contacted, so
/// browsers reachable through a forwarded port still connect.
pub async fn fetch_version(endpoint: &Endpoint, timeout: Duration) -> Result<BrowserVersion> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Other(format!("Failed to create HTTP client: {e}")))?;

    let url = endpoint.version_url();
    debug!("Fetching DevTools version document from {}", url);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::connection(endpoint.to_string(), e.to_string()))?;

    if !response.status().is_success() {
        return Err(Error::connection(
            endpoint.to_string(),
            format!("unexpected status {}", response.status()),
        ));
    }

    let mut version: BrowserVersion = response.json().await.map_err(|e| {
        Error::connection(
            endpoint.to_string(),
            format!("invalid /json/version document: {e}"),
        )
    })?;

    version.web_socket_debugger_url =
        rewrite_ws_host(&version.web_socket_debugger_url, &endpoint.host)?;
    Ok(version)
}

/// Point a loopback websocket URL at `host`.
fn rewrite_ws_host(ws_url: &str, host: &str) -> Result<String> {
    let mut url = Url::parse(ws_url)
        .map_err(|e| Error::connection(ws_url, format!("invalid websocket url: {e}")))?;

    let is_loopback = matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1")
    );
    let target_is_loopback = matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]");

    if is_loopback && !target_is_loopback {
        url.set_host(Some(host))
            .map_err(|e| Error::connection(ws_url, format!("cannot rewrite host: {e}")))?;
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_document() {
        let json = r#"{
            "Browser": "Chrome/126.0.6478.126",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "V8-Version": "12.6.228.21",
            "WebKit-Version": "537.36",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
        }"#;
        let version: BrowserVersion = serde_json::from_str(json).unwrap();
        assert_eq!(version.browser, "Chrome/126.0.6478.126");
        assert_eq!(version.protocol_version, "1.3");
        assert!(version.web_socket_debugger_url.ends_with("/devtools/browser/abc"));
    }

    #[test]
    fn test_rewrite_ws_host_for_remote_endpoint() {
        let rewritten =
            rewrite_ws_host("ws://127.0.0.1:9222/devtools/browser/abc", "10.0.0.5").unwrap();
        assert_eq!(rewritten, "ws://10.0.0.5:9222/devtools/browser/abc");
    }

    #[test]
    fn test_rewrite_ws_host_keeps_loopback() {
        let rewritten =
            rewrite_ws_host("ws://127.0.0.1:9222/devtools/browser/abc", "localhost").unwrap();
        assert_eq!(rewritten, "ws://127.0.0.1:9222/devtools/browser/abc");
    }

    #[test]
    fn test_rewrite_rejects_garbage() {
        assert!(rewrite_ws_host("not a url", "localhost").is_err());
    }

    #[tokio::test]
    async fn test_fetch_version_unreachable_is_connection_error() {
        // Port 9 (discard) is essentially never a DevTools endpoint.
        let endpoint = Endpoint::new("127.0.0.1", 9);
        let err = fetch_version(&endpoint, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.is_retryable());
    }
}
