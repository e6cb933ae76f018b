//! Chrome Debug MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! Tool calls are routed to the shared session context; browser-side failures
//! are reported as tool errors, malformed parameters as protocol errors.

use std::path::PathBuf;
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use chrome_debug_mcp_cdp::BrowserConnection;
use chrome_debug_mcp_core::Error;
use chrome_debug_mcp_session::{LaunchOptions, McpContext};

use crate::tools::*;

fn invalid_params(message: impl Into<String>) -> McpError {
    McpError::new(
        ErrorCode(-32602), // Invalid params
        message.into(),
        None,
    )
}

/// Serialize a response as pretty JSON text content.
fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::new(
            ErrorCode(-32603), // Internal error
            format!("Failed to serialize response: {e}"),
            None,
        )
    })?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// A failed browser operation as a tool error payload.
fn tool_failure(tool: &str, err: &Error) -> CallToolResult {
    error!("{} failed: {}", tool, err);
    let hint = if err.is_retryable() {
        " (retryable)"
    } else {
        ""
    };
    CallToolResult::error(vec![Content::text(format!("{tool} failed: {err}{hint}"))])
}

fn connect_response(conn: &BrowserConnection, pages: usize, message: String) -> ConnectResponse {
    ConnectResponse {
        connection_id: conn.id().to_string(),
        endpoint: conn.endpoint().to_string(),
        browser: conn.version().browser.clone(),
        protocol_version: conn.version().protocol_version.clone(),
        launched: conn.is_launched(),
        pages,
        message,
    }
}

fn require_expression(expression: &str) -> Result<(), McpError> {
    if expression.trim().is_empty() {
        return Err(invalid_params("expression cannot be empty"));
    }
    Ok(())
}

/// Chrome Debug MCP Server
///
/// Exposes browser and extension debugging through MCP tools. All tools share
/// one session context.
#[derive(Clone)]
pub struct ChromeDebugMcpServer {
    /// Process-wide session context
    context: Arc<McpContext>,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ChromeDebugMcpServer {
    /// Create a server on top of `context`.
    pub fn new(context: Arc<McpContext>) -> Self {
        Self {
            context,
            tool_router: Self::tool_router(),
        }
    }

    /// Shared session context.
    pub fn context(&self) -> &Arc<McpContext> {
        &self.context
    }

    async fn page_count(&self) -> usize {
        self.context.get_state().await.pages.len()
    }

    /// Attach to a running browser
    #[tool(
        description = "Attach to a running Chrome/Chromium started with --remote-debugging-port. Retries with backoff when the endpoint is not reachable yet."
    )]
    #[instrument(skip_all)]
    async fn attach_to_chrome(
        &self,
        Parameters(params): Parameters<AttachParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.host.as_deref().map_or(false, |h| h.trim().is_empty()) {
            return Err(invalid_params("host cannot be empty"));
        }
        if params.port == Some(0) {
            return Err(invalid_params("port must be > 0"));
        }

        info!(host = ?params.host, port = ?params.port, "Attaching to Chrome");

        match self.context.attach(params.host, params.port).await {
            Ok(conn) => {
                let pages = self.page_count().await;
                let message = format!(
                    "Attached to {} at {} ({} page(s) open)",
                    conn.version().browser,
                    conn.endpoint(),
                    pages
                );
                json_content(&connect_response(&conn, pages, message))
            }
            Err(e) => Ok(tool_failure("attach_to_chrome", &e)),
        }
    }

    /// Launch a new browser
    #[tool(
        description = "Launch a new Chrome/Chromium with remote debugging enabled and attach to it. Optionally loads unpacked extensions."
    )]
    #[instrument(skip_all)]
    async fn launch_chrome(
        &self,
        Parameters(params): Parameters<LaunchParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.debug_port == Some(0) {
            return Err(invalid_params("debugPort must be > 0"));
        }

        let load_extensions: Vec<PathBuf> =
            params.extension_dirs().into_iter().map(PathBuf::from).collect();
        if let Some(missing) = load_extensions.iter().find(|dir| !dir.is_dir()) {
            return Err(invalid_params(format!(
                "extension directory not found: {}",
                missing.display()
            )));
        }

        let options = LaunchOptions {
            headless: params.headless,
            debug_port: params.debug_port,
            user_data_dir: params.user_data_dir.map(PathBuf::from),
            executable_path: params.executable_path.map(PathBuf::from),
            load_extensions,
        };
        info!(
            headless = ?options.headless,
            debug_port = ?options.debug_port,
            extensions = options.load_extensions.len(),
            "Launching Chrome"
        );

        match self.context.launch(options).await {
            Ok(conn) => {
                let pages = self.page_count().await;
                let message = format!(
                    "Launched {} with debugging on {}",
                    conn.version().browser,
                    conn.endpoint()
                );
                json_content(&connect_response(&conn, pages, message))
            }
            Err(e) => Ok(tool_failure("launch_chrome", &e)),
        }
    }

    /// List open tabs
    #[tool(description = "List open tabs of the attached browser with their index, title and URL")]
    #[instrument(skip_all)]
    async fn list_tabs(
        &self,
        Parameters(_params): Parameters<ListTabsParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.context.connected_browser().await {
            return Ok(tool_failure("list_tabs", &e));
        }

        let warning = match self.context.refresh_pages().await {
            Ok(_) => None,
            Err(e) => {
                warn!("Returning cached tabs: {}", e);
                Some(format!("tab list may be stale: {e}"))
            }
        };

        let state = self.context.get_state().await;
        let selected = state
            .selected_page_index
            .min(state.pages.len().saturating_sub(1));
        let tabs: Vec<TabInfo> = state
            .pages
            .iter()
            .enumerate()
            .map(|(index, page)| TabInfo {
                index,
                target_id: page.target_id.clone(),
                title: page.title.clone(),
                url: page.url.clone(),
                selected: index == selected,
            })
            .collect();

        debug!("Listing {} tab(s)", tabs.len());
        let count = tabs.len();
        json_content(&ListTabsResponse {
            tabs,
            count,
            warning,
        })
    }

    /// Select a tab
    #[tool(description = "Select the tab at the given index (from list_tabs) and bring it to the front")]
    #[instrument(skip_all)]
    async fn switch_tab(
        &self,
        Parameters(params): Parameters<SwitchTabParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(index = params.index, "Switching tab");
        match self.context.switch_tab(params.index).await {
            Ok(tab) => json_content(&SwitchTabResponse {
                index: params.index,
                tab,
            }),
            Err(e) => Ok(tool_failure("switch_tab", &e)),
        }
    }

    /// Navigate the selected tab
    #[tool(description = "Navigate the selected tab to a URL")]
    #[instrument(skip_all)]
    async fn navigate(
        &self,
        Parameters(params): Parameters<NavigateParams>,
    ) -> Result<CallToolResult, McpError> {
        url::Url::parse(&params.url)
            .map_err(|e| invalid_params(format!("invalid url '{}': {e}", params.url)))?;

        match self.context.navigate(&params.url).await {
            Ok(page) => json_content(&NavigateResponse {
                target_id: page.target_id,
                url: page.url,
            }),
            Err(e) => Ok(tool_failure("navigate", &e)),
        }
    }

    /// Evaluate JavaScript in the selected tab
    #[tool(description = "Evaluate a JavaScript expression in the selected tab and return its value")]
    #[instrument(skip_all)]
    async fn evaluate(
        &self,
        Parameters(params): Parameters<EvaluateParams>,
    ) -> Result<CallToolResult, McpError> {
        require_expression(&params.expression)?;
        debug!("Evaluating in page: {}", params.expression);

        match self.context.evaluate(&params.expression).await {
            Ok(result) => json_content(&EvaluateResponse {
                result,
                extension_id: None,
                context_type: None,
            }),
            Err(e) => Ok(tool_failure("evaluate", &e)),
        }
    }

    /// Read captured console output
    #[tool(
        description = "Get console messages and uncaught exceptions captured from the browser (most recent 1000)"
    )]
    #[instrument(skip_all)]
    async fn get_console_logs(
        &self,
        Parameters(params): Parameters<ConsoleLogsParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut logs = self.context.console_logs(params.filter.as_deref());
        if let Some(limit) = params.limit {
            let skip = logs.len().saturating_sub(limit);
            logs.drain(..skip);
        }
        if params.clear {
            self.context.clear_console_logs();
            info!("Console log buffer cleared");
        }

        let count = logs.len();
        json_content(&ConsoleLogsResponse {
            logs,
            count,
            cleared: params.clear,
        })
    }

    /// List installed extensions
    #[tool(
        description = "List extensions visible in the attached browser with their contexts; results are cached briefly"
    )]
    #[instrument(skip_all)]
    async fn list_extensions(
        &self,
        Parameters(params): Parameters<ListExtensionsParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.context.list_extensions(params.include_disabled).await {
            Ok(extensions) => {
                let count = extensions.len();
                json_content(&ListExtensionsResponse { extensions, count })
            }
            Err(e) => Ok(tool_failure("list_extensions", &e)),
        }
    }

    /// Target an extension context
    #[tool(
        description = "Make an extension's background, content_script or popup context the target of evaluate_in_extension"
    )]
    #[instrument(skip_all)]
    async fn switch_extension_context(
        &self,
        Parameters(params): Parameters<SwitchExtensionContextParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.extension_id.trim().is_empty() {
            return Err(invalid_params("extensionId cannot be empty"));
        }

        match self
            .context
            .switch_extension_context(&params.extension_id, params.context_type)
            .await
        {
            Ok(context) => {
                let message = format!(
                    "Now targeting the {} context of {}",
                    context.context_type(),
                    context.extension_id
                );
                json_content(&SwitchExtensionContextResponse { context, message })
            }
            Err(e) => Ok(tool_failure("switch_extension_context", &e)),
        }
    }

    /// Evaluate JavaScript in the extension context
    #[tool(
        description = "Evaluate a JavaScript expression in the extension context chosen with switch_extension_context"
    )]
    #[instrument(skip_all)]
    async fn evaluate_in_extension(
        &self,
        Parameters(params): Parameters<EvaluateParams>,
    ) -> Result<CallToolResult, McpError> {
        require_expression(&params.expression)?;

        let target = self.context.current_extension_context().await;
        match self.context.evaluate_in_extension(&params.expression).await {
            Ok(result) => json_content(&EvaluateResponse {
                result,
                extension_id: target.as_ref().map(|c| c.extension_id.clone()),
                context_type: target.as_ref().map(|c| c.context_type()),
            }),
            Err(e) => Ok(tool_failure("evaluate_in_extension", &e)),
        }
    }

    /// Session diagnostics
    #[tool(description = "Get session diagnostics: uptime, connection health, tabs, cached extensions and log count")]
    #[instrument(skip_all)]
    async fn get_session_info(
        &self,
        Parameters(_params): Parameters<SessionInfoParams>,
    ) -> Result<CallToolResult, McpError> {
        let diagnostics = self.context.diagnostics().await;
        let current_page = self.context.get_current_page().await;
        let extension_context = self.context.current_extension_context().await;

        json_content(&SessionInfoResponse {
            diagnostics,
            current_page,
            extension_context,
        })
    }
}

#[tool_handler]
impl rmcp::ServerHandler for ChromeDebugMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Chrome Debug MCP Server - Debug Chrome pages and extensions over the DevTools Protocol. \
                 Use attach_to_chrome or launch_chrome first, list_tabs/switch_tab to pick a page, \
                 evaluate and get_console_logs to inspect it, and list_extensions, \
                 switch_extension_context and evaluate_in_extension for extensions."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrome_debug_mcp_cdp::testing::{MockBrowser, MockConnector};
    use chrome_debug_mcp_core::ServerConfig;

    fn server(browser: &MockBrowser) -> ChromeDebugMcpServer {
        let mut config = ServerConfig::default();
        config.connection.heartbeat_interval_ms = 0;
        let context = McpContext::new(config, Arc::new(MockConnector::new(browser.clone())));
        ChromeDebugMcpServer::new(context)
    }

    fn to_json(result: &CallToolResult) -> serde_json::Value {
        serde_json::to_value(result).unwrap()
    }

    #[tokio::test]
    async fn test_tool_failure_is_error_payload() {
        let browser = MockBrowser::new();
        let server = server(&browser);
        let result = server
            .evaluate(Parameters(EvaluateParams {
                expression: "1".to_string(),
            }))
            .await
            .unwrap();
        let value = to_json(&result);
        assert_eq!(value["isError"], true);
        assert!(value["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Not connected"));
    }

    #[tokio::test]
    async fn test_empty_expression_is_invalid_params() {
        let server = server(&MockBrowser::new());
        let err = server
            .evaluate(Parameters(EvaluateParams {
                expression: "  ".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[tokio::test]
    async fn test_navigate_rejects_relative_url() {
        let server = server(&MockBrowser::new());
        let err = server
            .navigate(Parameters(NavigateParams {
                url: "/relative".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    fn payload(result: &CallToolResult) -> serde_json::Value {
        let value = to_json(result);
        assert_ne!(value["isError"], true, "tool failed: {value}");
        serde_json::from_str(value["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_attach_tabs_and_diagnostics_flow() {
        let browser = MockBrowser::new();
        browser.add_page("P0", "https://example.com/");
        browser.add_page("P1", "https://example.org/");
        browser.on_evaluate("location.href", serde_json::json!("https://example.org/"));
        let server = server(&browser);

        let attached = payload(
            &server
                .attach_to_chrome(Parameters(AttachParams::default()))
                .await
                .unwrap(),
        );
        assert_eq!(attached["endpoint"], "localhost:9222");
        assert_eq!(attached["pages"], 2);
        assert_eq!(attached["launched"], false);

        let switched = payload(
            &server
                .switch_tab(Parameters(SwitchTabParams { index: 1 }))
                .await
                .unwrap(),
        );
        assert_eq!(switched["tab"]["targetId"], "P1");

        let tabs = payload(
            &server
                .list_tabs(Parameters(ListTabsParams {}))
                .await
                .unwrap(),
        );
        assert_eq!(tabs["count"], 2);
        assert_eq!(tabs["tabs"][1]["selected"], true);
        assert!(tabs.get("warning").is_none());

        let evaluated = payload(
            &server
                .evaluate(Parameters(EvaluateParams {
                    expression: "location.href".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(evaluated["result"], "https://example.org/");

        server.context().add_console_log("[log] one");
        server.context().add_console_log("[log] two");
        let logs = payload(
            &server
                .get_console_logs(Parameters(ConsoleLogsParams {
                    clear: true,
                    filter: None,
                    limit: Some(1),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(logs["count"], 1);
        assert!(logs["logs"][0].as_str().unwrap().ends_with("[log] two"));
        assert!(server.context().console_logs(None).is_empty());

        let info = payload(
            &server
                .get_session_info(Parameters(SessionInfoParams {}))
                .await
                .unwrap(),
        );
        assert_eq!(info["browserConnected"], true);
        assert_eq!(info["pagesCount"], 2);
        assert_eq!(info["consoleLogs"], 0);
        assert_eq!(info["currentPage"]["targetId"], "P1");
        assert!(info["extensionContext"].is_null());
    }

    #[tokio::test]
    async fn test_missing_popup_is_tool_error() {
        let browser = MockBrowser::new();
        let server = server(&browser);
        server
            .attach_to_chrome(Parameters(AttachParams::default()))
            .await
            .unwrap();

        let result = server
            .switch_extension_context(Parameters(SwitchExtensionContextParams {
                extension_id: "abcdefghijklmnopabcdefghijklmnop".to_string(),
                context_type: chrome_debug_mcp_core::ExtensionContextType::Popup,
            }))
            .await
            .unwrap();
        let value = to_json(&result);
        assert_eq!(value["isError"], true);
        assert!(value["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Target not found"));
    }

    #[tokio::test]
    async fn test_launch_rejects_missing_extension_dir() {
        let server = server(&MockBrowser::new());
        let err = server
            .launch_chrome(Parameters(LaunchParams {
                load_extension: Some("/nonexistent/extension".to_string()),
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[test]
    fn test_server_info_enables_tools() {
        let server = server(&MockBrowser::new());
        let info = rmcp::ServerHandler::get_info(&server);
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("attach_to_chrome"));
    }
}
