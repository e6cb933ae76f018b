//! MCP Tool Types
//!
//! Parameter and response types of every tool exposed by the server. Field
//! names are camelCase on the wire.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chrome_debug_mcp_core::{ExtensionContextType, ExtensionInfo, PageTarget};
use chrome_debug_mcp_session::{ExtensionContext, SessionDiagnostics};

// =============================================================================
// Connection Tools
// =============================================================================

/// Parameters for attach_to_chrome
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttachParams {
    /// Host of the remote-debugging endpoint (default: "localhost")
    #[serde(default)]
    #[schemars(extend("default" = "localhost"))]
    pub host: Option<String>,

    /// Remote-debugging port (default: 9222)
    #[serde(default)]
    #[schemars(extend("default" = 9222))]
    pub port: Option<u16>,
}

/// Parameters for launch_chrome
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LaunchParams {
    /// Run without a visible window (default: false, or true with --headless)
    #[serde(default)]
    #[schemars(extend("default" = false))]
    pub headless: Option<bool>,

    /// Remote-debugging port (default: 9222)
    #[serde(default)]
    #[schemars(extend("default" = 9222))]
    pub debug_port: Option<u16>,

    /// Profile directory; a temporary profile is used when omitted
    #[serde(default)]
    pub user_data_dir: Option<String>,

    /// Chrome/Chromium executable; auto-detected when omitted
    #[serde(default)]
    pub executable_path: Option<String>,

    /// Comma-separated unpacked extension directories to load
    #[serde(default)]
    pub load_extension: Option<String>,
}

impl LaunchParams {
    /// Extension directories listed in `load_extension`.
    pub fn extension_dirs(&self) -> Vec<String> {
        self.load_extension
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Response for attach_to_chrome and launch_chrome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    /// Connection identifier
    pub connection_id: String,
    /// `host:port` of the debugging endpoint
    pub endpoint: String,
    /// Browser product string
    pub browser: String,
    /// DevTools protocol version
    pub protocol_version: String,
    /// Whether the server started this browser
    pub launched: bool,
    /// Number of open pages
    pub pages: usize,
    /// Human-readable summary
    pub message: String,
}

// =============================================================================
// Page Tools
// =============================================================================

/// Parameters for list_tabs
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListTabsParams {}

/// One tab in list_tabs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    /// Position used by switch_tab
    pub index: usize,
    /// Target identifier
    pub target_id: String,
    /// Page title
    pub title: String,
    /// Page URL
    pub url: String,
    /// Whether this is the selected tab
    pub selected: bool,
}

/// Response for list_tabs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTabsResponse {
    /// Open tabs in browser order
    pub tabs: Vec<TabInfo>,
    /// Number of tabs
    pub count: usize,
    /// Set when the tab list could not be refreshed and may be stale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Parameters for switch_tab
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwitchTabParams {
    /// Index from list_tabs
    pub index: usize,
}

/// Response for switch_tab
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchTabResponse {
    /// Selected index
    pub index: usize,
    /// Selected tab
    pub tab: PageTarget,
}

/// Parameters for navigate
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    /// Absolute URL to open in the selected tab
    pub url: String,
}

/// Response for navigate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResponse {
    /// Navigated tab
    pub target_id: String,
    /// Requested URL
    pub url: String,
}

/// Parameters for evaluate and evaluate_in_extension
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
    /// JavaScript expression; promises are awaited
    pub expression: String,
}

/// Response for evaluate and evaluate_in_extension
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    /// Result by value
    pub result: Value,
    /// Extension the expression ran in (evaluate_in_extension only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    /// Context the expression ran in (evaluate_in_extension only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_type: Option<ExtensionContextType>,
}

// =============================================================================
// Console Tools
// =============================================================================

/// Parameters for get_console_logs
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogsParams {
    /// Clear the buffer after reading (default: false)
    #[serde(default)]
    pub clear: bool,

    /// Only return lines containing this text (case-insensitive)
    #[serde(default)]
    pub filter: Option<String>,

    /// Only return the most recent N lines
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response for get_console_logs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogsResponse {
    /// Timestamped lines, oldest first
    pub logs: Vec<String>,
    /// Number of returned lines
    pub count: usize,
    /// Whether the buffer was cleared
    pub cleared: bool,
}

// =============================================================================
// Extension Tools
// =============================================================================

/// Parameters for list_extensions
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListExtensionsParams {
    /// Also return cached extensions without live contexts (default: false)
    #[serde(default)]
    pub include_disabled: bool,
}

/// Response for list_extensions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExtensionsResponse {
    /// Extensions sorted by name
    pub extensions: Vec<ExtensionInfo>,
    /// Number of extensions
    pub count: usize,
}

/// Parameters for switch_extension_context
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwitchExtensionContextParams {
    /// 32-character extension id
    pub extension_id: String,

    /// Context to target: background, content_script or popup
    pub context_type: ExtensionContextType,
}

/// Response for switch_extension_context
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchExtensionContextResponse {
    /// Active extension context
    pub context: ExtensionContext,
    /// Human-readable summary
    pub message: String,
}

// =============================================================================
// Session Tools
// =============================================================================

/// Parameters for get_session_info
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfoParams {}

/// Response for get_session_info
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoResponse {
    /// Session diagnostics
    #[serde(flatten)]
    pub diagnostics: SessionDiagnostics,
    /// Selected tab
    pub current_page: Option<PageTarget>,
    /// Active extension context
    pub extension_context: Option<ExtensionContext>,
}
