//! The live browser connection handed to the session layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use chrome_debug_mcp_core::{
    extension_id_from_url, ConnectionId, Endpoint, Error, PageTarget, Result, TargetInfo,
};

use crate::connector::{BrowserProcess, ConnectedTransport};
use crate::discovery::BrowserVersion;
use crate::events::CdpEvent;
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

/// A JavaScript execution context reported by `Runtime.executionContextCreated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContextInfo {
    /// Context id, unique within its session
    pub id: i64,
    /// Security origin
    pub origin: String,
    /// Human readable name (extension name for content scripts)
    pub name: String,
    /// Main world of its frame
    pub is_default: bool,
    /// `default`, `isolated` or `worker`
    pub world_type: Option<String>,
}

impl ExecutionContextInfo {
    /// Decode a `Runtime.ExecutionContextDescription`.
    pub fn from_description(value: &Value) -> Option<Self> {
        let aux = value.get("auxData");
        Some(Self {
            id: value.get("id")?.as_i64()?,
            origin: value
                .get("origin")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            is_default: aux
                .and_then(|a| a.get("isDefault"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            world_type: aux
                .and_then(|a| a.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Extension owning this context, if its origin is an extension origin.
    pub fn extension_id(&self) -> Option<&str> {
        extension_id_from_url(&self.origin)
    }
}

/// A flat session attached to one target.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedSession {
    /// CDP session id
    pub session_id: String,
    /// Target the session is attached to
    pub target: TargetInfo,
    /// Live execution contexts in the session
    pub contexts: Vec<ExecutionContextInfo>,
}

#[derive(Debug, Default)]
struct SessionIndex {
    by_target: HashMap<String, String>,
    sessions: HashMap<String, AttachedSession>,
}

/// Index of attached sessions and their execution contexts for one connection.
#[derive(Debug, Default)]
pub struct TargetSessions {
    inner: Mutex<SessionIndex>,
}

impl TargetSessions {
    fn lock(&self) -> MutexGuard<'_, SessionIndex> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a session attached to `target`.
    pub fn insert(&self, session_id: &str, target: TargetInfo) {
        let mut index = self.lock();
        index
            .by_target
            .insert(target.target_id.clone(), session_id.to_string());
        index
            .sessions
            .entry(session_id.to_string())
            .and_modify(|s| s.target = target.clone())
            .or_insert_with(|| AttachedSession {
                session_id: session_id.to_string(),
                target,
                contexts: Vec::new(),
            });
    }

    /// Forget a session.
    pub fn remove_session(&self, session_id: &str) {
        let mut index = self.lock();
        if let Some(session) = index.sessions.remove(session_id) {
            index.by_target.remove(&session.target.target_id);
        }
    }

    /// Forget the session of a destroyed target.
    pub fn remove_target(&self, target_id: &str) {
        let mut index = self.lock();
        if let Some(session_id) = index.by_target.remove(target_id) {
            index.sessions.remove(&session_id);
        }
    }

    /// Session attached to `target_id`, if any.
    pub fn session_for_target(&self, target_id: &str) -> Option<String> {
        self.lock().by_target.get(target_id).cloned()
    }

    /// Snapshot of one session.
    pub fn get(&self, session_id: &str) -> Option<AttachedSession> {
        self.lock().sessions.get(session_id).cloned()
    }

    /// Snapshot of all sessions.
    pub fn sessions(&self) -> Vec<AttachedSession> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Number of attached sessions.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Whether no session is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a new execution context, replacing one with the same id.
    pub fn add_context(&self, session_id: &str, context: ExecutionContextInfo) {
        let mut index = self.lock();
        if let Some(session) = index.sessions.get_mut(session_id) {
            session.contexts.retain(|c| c.id != context.id);
            session.contexts.push(context);
        }
    }

    /// Drop an execution context.
    pub fn remove_context(&self, session_id: &str, id: i64) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.contexts.retain(|c| c.id != id);
        }
    }

    /// Drop all execution contexts of a session (navigation).
    pub fn clear_contexts(&self, session_id: &str) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.contexts.clear();
        }
    }

    /// Isolated-world contexts injected into pages by extensions.
    pub fn content_script_contexts(&self) -> Vec<(AttachedSession, ExecutionContextInfo)> {
        let index = self.lock();
        let mut found = Vec::new();
        for session in index.sessions.values() {
            if !session.target.is_page() || session.target.extension_id().is_some() {
                continue;
            }
            for context in &session.contexts {
                if !context.is_default && context.extension_id().is_some() {
                    found.push((session.clone(), context.clone()));
                }
            }
        }
        found
    }

    /// Update the index from a decoded event.
    pub fn apply(&self, event: &CdpEvent) {
        match event {
            CdpEvent::AttachedToTarget {
                session_id, target, ..
            } => self.insert(session_id, target.clone()),
            CdpEvent::DetachedFromTarget { session_id } => self.remove_session(session_id),
            CdpEvent::TargetDestroyed { target_id } => self.remove_target(target_id),
            CdpEvent::ExecutionContextCreated {
                session_id,
                context,
            } => self.add_context(session_id, context.clone()),
            CdpEvent::ExecutionContextDestroyed { session_id, id } => {
                self.remove_context(session_id, *id)
            }
            CdpEvent::ExecutionContextsCleared { session_id } => self.clear_contexts(session_id),
            CdpEvent::ConsoleApiCalled { .. }
            | CdpEvent::ExceptionThrown { .. }
            | CdpEvent::Other(_) => {}
        }
    }
}

/// One live protocol connection to a browser.
///
/// Instances are only constructed after a completed handshake; the session
/// layer swaps whole connections instead of mutating one in place.
pub struct BrowserConnection {
    id: ConnectionId,
    endpoint: Endpoint,
    transport: Arc<dyn CdpTransport>,
    process: AsyncMutex<Option<Box<dyn BrowserProcess>>>,
    launched: bool,
    version: BrowserVersion,
    sessions: TargetSessions,
    established_at: DateTime<Utc>,
    command_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for BrowserConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserConnection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("launched", &self.launched)
            .field("browser", &self.version.browser)
            .finish_non_exhaustive()
    }
}

impl BrowserConnection {
    /// Wrap a completed handshake.
    pub fn new(
        endpoint: Endpoint,
        connected: ConnectedTransport,
        process: Option<Box<dyn BrowserProcess>>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            endpoint,
            transport: connected.transport,
            launched: process.is_some(),
            process: AsyncMutex::new(process),
            version: connected.version,
            sessions: TargetSessions::default(),
            established_at: Utc::now(),
            command_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Identity of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Endpoint the connection was made to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Version document of the browser.
    pub fn version(&self) -> &BrowserVersion {
        &self.version
    }

    /// When the handshake completed.
    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Whether the browser process was started by this server.
    pub fn is_launched(&self) -> bool {
        self.launched
    }

    /// Attached sessions of this connection.
    pub fn sessions(&self) -> &TargetSessions {
        &self.sessions
    }

    /// True until closed or the transport drops.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && self.transport.is_alive()
    }

    /// Send a command to the browser target.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_command(CommandTarget::Browser, method, params)
            .await
    }

    /// Send a command to an attached session.
    pub async fn send_to(&self, session_id: &str, method: &str, params: Value) -> Result<Value> {
        self.send_command(CommandTarget::Session(session_id.to_string()), method, params)
            .await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        tokio::time::timeout(
            self.command_timeout,
            self.transport.send_command(target, method, params),
        )
        .await
        .map_err(|_| Error::Timeout {
            operation: method.to_string(),
            ms: self.command_timeout.as_millis() as u64,
        })?
    }

    /// Liveness round-trip.
    pub async fn probe(&self) -> Result<()> {
        self.send("Browser.getVersion", json!({})).await.map(|_| ())
    }

    /// All targets known to the browser, in the browser's order.
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let result = self
            .send("Target.getTargets", json!({}))
            .await
            .map_err(|e| Error::Enumeration(format!("Target.getTargets failed: {e}")))?;
        let infos = result
            .get("targetInfos")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(infos)
            .map_err(|e| Error::Enumeration(format!("malformed targetInfos: {e}")))
    }

    /// Page targets, in the browser's order.
    pub async fn page_targets(&self) -> Result<Vec<PageTarget>> {
        Ok(self
            .list_targets()
            .await?
            .iter()
            .filter(|t| t.is_page())
            .map(PageTarget::from)
            .collect())
    }

    /// Session attached to `target`, attaching (flat) when there is none yet.
    pub async fn attach_session(&self, target: &TargetInfo) -> Result<String> {
        if let Some(session_id) = self.sessions.session_for_target(&target.target_id) {
            return Ok(session_id);
        }

        let result = self
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target.target_id, "flatten": true }),
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol {
                method: "Target.attachToTarget".to_string(),
                message: "response without sessionId".to_string(),
            })?
            .to_string();

        self.sessions.insert(&session_id, target.clone());
        if let Err(e) = self.send_to(&session_id, "Runtime.enable", json!({})).await {
            debug!(session = %session_id, "Runtime.enable failed: {}", e);
        }
        Ok(session_id)
    }

    /// Evaluate `expression` in a session, optionally in a specific context.
    ///
    /// The result is returned by value; promises are awaited. A thrown
    /// exception becomes a protocol error carrying its description.
    pub async fn evaluate(
        &self,
        session_id: &str,
        expression: &str,
        context_id: Option<i64>,
    ) -> Result<Value> {
        let mut params = json!({
            "expression": expression,
            "returnByValue": true,
            "awaitPromise": true,
        });
        if let Some(id) = context_id {
            params["contextId"] = json!(id);
        }

        let result = self.send_to(session_id, "Runtime.evaluate", params).await?;

        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("evaluation threw")
                .to_string();
            return Err(Error::Protocol {
                method: "Runtime.evaluate".to_string(),
                message,
            });
        }

        let remote = result.get("result").cloned().unwrap_or(Value::Null);
        if let Some(value) = remote.get("value") {
            return Ok(value.clone());
        }
        if let Some(unserializable) = remote.get("unserializableValue") {
            return Ok(unserializable.clone());
        }
        Ok(remote
            .get("description")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Enable target discovery and flat auto-attach.
    pub async fn enable_target_discovery(&self) -> Result<()> {
        self.send("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        self.send(
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
        )
        .await?;
        Ok(())
    }

    /// Next raw event; `None` once the transport closed.
    pub async fn next_event(&self) -> Option<TransportEvent> {
        self.transport.next_event().await
    }

    /// Exit description of a launched browser that has died.
    pub async fn process_exit(&self) -> Option<String> {
        let mut process = self.process.lock().await;
        process.as_mut().and_then(|p| p.has_exited())
    }

    /// Close the connection and terminate a launched browser. Errors are logged.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        debug!(connection = %self.id, endpoint = %self.endpoint, "Closing browser connection");
        self.transport.shutdown().await;

        if let Some(mut process) = self.process.lock().await.take() {
            if let Err(e) = process.kill().await {
                warn!(connection = %self.id, "Failed to terminate browser process: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXT: &str = "abcdefghijklmnopabcdefghijklmnop";

    fn target(id: &str, kind: &str, url: &str) -> TargetInfo {
        TargetInfo {
            target_id: id.to_string(),
            target_type: kind.to_string(),
            title: String::new(),
            url: url.to_string(),
            attached: true,
            opener_id: None,
        }
    }

    fn context(id: i64, origin: &str, is_default: bool) -> ExecutionContextInfo {
        ExecutionContextInfo {
            id,
            origin: origin.to_string(),
            name: String::new(),
            is_default,
            world_type: Some(if is_default { "default" } else { "isolated" }.to_string()),
        }
    }

    #[test]
    fn test_sessions_insert_and_remove() {
        let sessions = TargetSessions::default();
        sessions.insert("S1", target("T1", "page", "https://example.com/"));
        assert_eq!(sessions.session_for_target("T1").as_deref(), Some("S1"));
        assert_eq!(sessions.len(), 1);

        sessions.remove_target("T1");
        assert!(sessions.is_empty());
        assert!(sessions.session_for_target("T1").is_none());
    }

    #[test]
    fn test_contexts_follow_events() {
        let sessions = TargetSessions::default();
        sessions.apply(&CdpEvent::AttachedToTarget {
            session_id: "S1".to_string(),
            target: target("T1", "page", "https://example.com/"),
            waiting_for_debugger: false,
        });
        sessions.apply(&CdpEvent::ExecutionContextCreated {
            session_id: "S1".to_string(),
            context: context(1, "https://example.com", true),
        });
        sessions.apply(&CdpEvent::ExecutionContextCreated {
            session_id: "S1".to_string(),
            context: context(2, &format!("chrome-extension://{EXT}"), false),
        });

        let found = sessions.content_script_contexts();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.id, 2);
        assert_eq!(found[0].1.extension_id(), Some(EXT));

        sessions.apply(&CdpEvent::ExecutionContextsCleared {
            session_id: "S1".to_string(),
        });
        assert!(sessions.content_script_contexts().is_empty());

        sessions.apply(&CdpEvent::DetachedFromTarget {
            session_id: "S1".to_string(),
        });
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_extension_pages_are_not_content_scripts() {
        let sessions = TargetSessions::default();
        sessions.insert(
            "S2",
            target("T2", "page", &format!("chrome-extension://{EXT}/popup.html")),
        );
        sessions.add_context("S2", context(5, &format!("chrome-extension://{EXT}"), false));
        assert!(sessions.content_script_contexts().is_empty());
    }

    #[test]
    fn test_context_from_description() {
        let ctx = ExecutionContextInfo::from_description(&json!({
            "id": 3,
            "origin": "https://example.com",
            "name": "",
            "auxData": {"isDefault": true, "type": "default"}
        }))
        .unwrap();
        assert_eq!(ctx.id, 3);
        assert!(ctx.is_default);
        assert!(ctx.extension_id().is_none());
        assert!(ExecutionContextInfo::from_description(&json!({"origin": "x"})).is_none());
    }
}
