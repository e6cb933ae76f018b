//! Message-level CDP transport.
//!
//! `ChromiumTransport` owns the websocket through chromiumoxide's
//! `Connection` and runs it on a dedicated task. Commands are submitted over a
//! channel and answered through oneshot responders keyed by call id; events
//! are forwarded to a bounded queue that the session layer drains.

use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chrome_debug_mcp_core::{Error, Result};

const COMMAND_QUEUE: usize = 128;
const EVENT_QUEUE: usize = 1024;

/// A protocol event received from the browser.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    /// Event method, e.g. `Runtime.consoleAPICalled`
    pub method: String,
    /// Event parameters
    pub params: Value,
    /// Flat session the event belongs to (None for the browser target)
    pub session_id: Option<String>,
}

/// Where a command is sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    /// The browser target itself
    Browser,
    /// A flat session attached to a page or worker target
    Session(String),
}

/// A bidirectional CDP channel.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Send a command and wait for its result payload.
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value>;

    /// Wait for the next event; `None` once the transport has closed.
    async fn next_event(&self) -> Option<TransportEvent>;

    /// Whether the underlying socket is still open.
    fn is_alive(&self) -> bool;

    /// Close the transport. Idempotent.
    async fn shutdown(&self);
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value>>,
}

type Inflight = HashMap<CallId, (String, oneshot::Sender<Result<Value>>)>;

/// CDP transport backed by a chromiumoxide websocket connection.
pub struct ChromiumTransport {
    ws_url: String,
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl ChromiumTransport {
    /// Open the websocket at `ws_url` and start the connection loop.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let conn = Connection::<CdpEventMessage>::connect(ws_url)
            .await
            .map_err(|err| Error::connection(ws_url, err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();

        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", %err, "transport loop terminated with error");
            }
        });

        info!(target: "cdp-transport", url = %ws_url, "devtools websocket established");

        Ok(Self {
            ws_url: ws_url.to_string(),
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            alive,
        })
    }

    /// Websocket URL this transport is connected to.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        let mut inflight: Inflight = HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight);
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            Self::handle_event(event, &event_tx);
                        }
                        Some(Err(err)) => {
                            let reason = err.to_string();
                            for (_, (method, sender)) in inflight.drain() {
                                let _ = sender.send(Err(Error::connection(
                                    "devtools websocket",
                                    format!("{method}: {reason}"),
                                )));
                            }
                            return Err(Error::connection("devtools websocket", reason));
                        }
                        None => {
                            for (_, (method, sender)) in inflight.drain() {
                                let _ = sender.send(Err(Error::connection(
                                    "devtools websocket",
                                    format!("{method}: connection closed"),
                                )));
                            }
                            debug!(target: "cdp-transport", "devtools websocket closed by peer");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut Inflight,
    ) {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, (cmd.method, cmd.responder));
            }
            Err(err) => {
                warn!(target: "cdp-transport", method = %cmd.method, %err, "failed to submit command");
                let _ = cmd
                    .responder
                    .send(Err(Error::connection("devtools websocket", err.to_string())));
            }
        }
    }

    fn handle_response(resp: Response, inflight: &mut Inflight) {
        if let Some((method, sender)) = inflight.remove(&resp.id) {
            let _ = sender.send(Self::extract_payload(&method, resp));
        }
    }

    fn handle_event(event: CdpEventMessage, event_tx: &mpsc::Sender<TransportEvent>) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                debug!(target: "cdp-transport", ?err, "failed to decode cdp event");
                return;
            }
        };

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        // Never block the socket on a slow consumer.
        if let Err(mpsc::error::TrySendError::Full(dropped)) = event_tx.try_send(payload) {
            debug!(target: "cdp-transport", method = %dropped.method, "event queue full, dropping event");
        }
    }

    fn extract_payload(method: &str, resp: Response) -> Result<Value> {
        if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(Error::Protocol {
                method: method.to_string(),
                message: format!("{} (code {})", error.message, error.code),
            })
        } else {
            Err(Error::Protocol {
                method: method.to_string(),
                message: "empty response".to_string(),
            })
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        if !self.is_alive() {
            return Err(Error::connection(&self.ws_url, "transport closed"));
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|_| Error::connection(&self.ws_url, "transport loop stopped"))?;

        resp_rx
            .await
            .map_err(|_| Error::connection(&self.ws_url, "command response channel closed"))?
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) {
        if self.alive.swap(false, Ordering::Relaxed) {
            debug!(target: "cdp-transport", url = %self.ws_url, "shutting down transport");
        }
        self.loop_task.abort();
    }
}

impl Drop for ChromiumTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
    }
}
