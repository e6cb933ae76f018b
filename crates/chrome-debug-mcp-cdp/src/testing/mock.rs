//! Scripted browser doubles.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use chrome_debug_mcp_core::{Endpoint, Error, Result, TargetInfo};

use crate::connector::{BrowserConnector, BrowserProcess, ConnectedTransport};
use crate::discovery::BrowserVersion;
use crate::launcher::LaunchRequest;
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

#[derive(Debug, Default)]
struct BrowserState {
    targets: Vec<TargetInfo>,
    fail_enumeration: bool,
    fail_heartbeat: bool,
    evaluations: Vec<(String, std::result::Result<Value, String>)>,
    calls: Vec<(CommandTarget, String, Value)>,
}

/// An in-memory browser answering the commands the server issues.
///
/// Clones share state, so a test keeps one handle while transports hold others.
#[derive(Debug, Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MockBrowser {
    /// Browser with no targets.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build a target description.
    pub fn target(id: &str, kind: &str, url: &str) -> TargetInfo {
        TargetInfo {
            target_id: id.to_string(),
            target_type: kind.to_string(),
            title: format!("{kind} {id}"),
            url: url.to_string(),
            attached: false,
            opener_id: None,
        }
    }

    /// Add a `page` target.
    pub fn add_page(&self, id: &str, url: &str) {
        self.add_target(Self::target(id, "page", url));
    }

    /// Add any target.
    pub fn add_target(&self, target: TargetInfo) {
        self.lock().targets.push(target);
    }

    /// Replace all targets.
    pub fn set_targets(&self, targets: Vec<TargetInfo>) {
        self.lock().targets = targets;
    }

    /// Remove a target by id.
    pub fn remove_target(&self, id: &str) {
        self.lock().targets.retain(|t| t.target_id != id);
    }

    /// Make `Target.getTargets` fail.
    pub fn set_fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Make `Browser.getVersion` fail.
    pub fn set_fail_heartbeat(&self, fail: bool) {
        self.lock().fail_heartbeat = fail;
    }

    /// Answer evaluations whose expression contains `needle` with `value`.
    pub fn on_evaluate(&self, needle: &str, value: Value) {
        self.lock().evaluations.push((needle.to_string(), Ok(value)));
    }

    /// Make evaluations whose expression contains `needle` throw `message`.
    pub fn on_evaluate_throw(&self, needle: &str, message: &str) {
        self.lock()
            .evaluations
            .push((needle.to_string(), Err(message.to_string())));
    }

    /// All commands received so far.
    pub fn calls(&self) -> Vec<(CommandTarget, String, Value)> {
        self.lock().calls.clone()
    }

    /// Number of received commands with `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|(_, m, _)| m == method).count()
    }

    fn respond(&self, target: CommandTarget, method: &str, params: Value) -> Result<Value> {
        let mut state = self.lock();
        state
            .calls
            .push((target, method.to_string(), params.clone()));

        match method {
            "Target.getTargets" => {
                if state.fail_enumeration {
                    return Err(Error::Protocol {
                        method: method.to_string(),
                        message: "enumeration failed".to_string(),
                    });
                }
                Ok(json!({ "targetInfos": state.targets }))
            }
            "Browser.getVersion" => {
                if state.fail_heartbeat {
                    return Err(Error::Protocol {
                        method: method.to_string(),
                        message: "browser not responding".to_string(),
                    });
                }
                Ok(json!({ "product": "MockChrome/1.0", "protocolVersion": "1.3" }))
            }
            "Target.attachToTarget" => {
                let target_id = params
                    .get("targetId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !state.targets.iter().any(|t| t.target_id == target_id) {
                    return Err(Error::Protocol {
                        method: method.to_string(),
                        message: format!("No target with given id found: {target_id}"),
                    });
                }
                Ok(json!({ "sessionId": format!("S-{target_id}") }))
            }
            "Target.activateTarget" | "Page.navigate" => {
                let known = params
                    .get("targetId")
                    .and_then(Value::as_str)
                    .map(|id| state.targets.iter().any(|t| t.target_id == id))
                    .unwrap_or(true);
                if !known {
                    return Err(Error::Protocol {
                        method: method.to_string(),
                        message: "No target with given id found".to_string(),
                    });
                }
                Ok(json!({ "frameId": "F-mock" }))
            }
            "Runtime.evaluate" => {
                let expression = params
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let rule = state
                    .evaluations
                    .iter()
                    .rev()
                    .find(|(needle, _)| expression.contains(needle.as_str()))
                    .map(|(_, outcome)| outcome.clone());
                match rule {
                    Some(Ok(value)) => Ok(json!({ "result": { "type": "object", "value": value } })),
                    Some(Err(message)) => Ok(json!({
                        "result": { "type": "object", "subtype": "error" },
                        "exceptionDetails": {
                            "text": "Uncaught",
                            "exception": { "description": message }
                        }
                    })),
                    None => Ok(json!({ "result": { "type": "undefined" } })),
                }
            }
            _ => Ok(json!({})),
        }
    }
}

/// A transport bound to a [`MockBrowser`].
pub struct MockTransport {
    browser: MockBrowser,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    events_rx: AsyncMutex<mpsc::UnboundedReceiver<TransportEvent>>,
    alive: AtomicBool,
}

impl MockTransport {
    /// Open transport to `browser`.
    pub fn new(browser: MockBrowser) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            browser,
            events_tx: Mutex::new(Some(tx)),
            events_rx: AsyncMutex::new(rx),
            alive: AtomicBool::new(true),
        }
    }

    /// Deliver an event to the consumer.
    pub fn push_event(&self, method: &str, params: Value, session_id: Option<&str>) {
        let guard = self.events_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(TransportEvent {
                method: method.to_string(),
                params,
                session_id: session_id.map(str::to_string),
            });
        }
    }

    /// Simulate the socket dropping.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Relaxed);
        self.events_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

#[async_trait]
impl CdpTransport for MockTransport {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        if !self.is_alive() {
            return Err(Error::connection("mock", "transport closed"));
        }
        self.browser.respond(target, method, params)
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events_rx.lock().await.recv().await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) {
        self.kill();
    }
}

/// A process double with observable termination.
#[derive(Debug, Clone, Default)]
pub struct MockProcess {
    killed: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
}

impl MockProcess {
    /// Whether `kill` was called.
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self) {
        self.exited.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl BrowserProcess for MockProcess {
    fn has_exited(&mut self) -> Option<String> {
        if self.exited.load(Ordering::Relaxed) || self.was_killed() {
            Some("mock browser exited".to_string())
        } else {
            None
        }
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// A connector whose handshakes and launches are scripted.
#[derive(Default)]
pub struct MockConnector {
    browser: MockBrowser,
    failures_remaining: AtomicU32,
    connect_attempts: AtomicU32,
    unreachable: AtomicBool,
    spawn_fails: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    occupied_ports: Mutex<HashSet<u16>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    processes: Mutex<Vec<MockProcess>>,
}

impl MockConnector {
    /// Connector whose transports talk to `browser`.
    pub fn new(browser: MockBrowser) -> Self {
        Self {
            browser,
            ..Default::default()
        }
    }

    /// Fail the next `n` handshakes with a connection error.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::Relaxed);
    }

    /// Fail every handshake until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Make `spawn` fail with a launch error.
    pub fn set_spawn_fails(&self, fails: bool) {
        self.spawn_fails.store(fails, Ordering::Relaxed);
    }

    /// Delay every handshake.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Report `port` as taken by another process.
    pub fn occupy_port(&self, port: u16) {
        self.occupied_ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(port);
    }

    /// Handshakes attempted so far.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Every transport handed out, oldest first.
    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Transports still open.
    pub fn live_transports(&self) -> usize {
        self.transports().iter().filter(|t| t.is_alive()).count()
    }

    /// Most recent transport.
    pub fn last_transport(&self) -> Option<Arc<MockTransport>> {
        self.transports().last().cloned()
    }

    /// Every process spawned, oldest first.
    pub fn processes(&self) -> Vec<MockProcess> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BrowserConnector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<ConnectedTransport> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let delay = *self.connect_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(Error::connection(
                    endpoint.to_string(),
                    format!("handshake timed out after {}ms", timeout.as_millis()),
                ));
            }
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.load(Ordering::Relaxed) {
            return Err(Error::connection(endpoint.to_string(), "connection refused"));
        }
        let remaining = self.failures_remaining.load(Ordering::Relaxed);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
            return Err(Error::connection(endpoint.to_string(), "connection refused"));
        }

        let transport = Arc::new(MockTransport::new(self.browser.clone()));
        self.transports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(transport.clone());

        Ok(ConnectedTransport {
            transport,
            version: BrowserVersion {
                browser: "MockChrome/1.0".to_string(),
                protocol_version: "1.3".to_string(),
                user_agent: "Mock".to_string(),
                web_socket_debugger_url: format!(
                    "ws://{}:{}/devtools/browser/mock",
                    endpoint.host, endpoint.port
                ),
            },
        })
    }

    async fn port_in_use(&self, port: u16) -> bool {
        self.occupied_ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&port)
    }

    async fn spawn(&self, _request: &LaunchRequest) -> Result<Box<dyn BrowserProcess>> {
        if self.spawn_fails.load(Ordering::Relaxed) {
            return Err(Error::Launch("mock browser failed to start".to_string()));
        }
        let process = MockProcess::default();
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(process.clone());
        Ok(Box::new(process))
    }
}
