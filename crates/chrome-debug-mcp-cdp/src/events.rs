//! Typed decoding of the CDP events the session layer reacts to.

use serde_json::Value;

use chrome_debug_mcp_core::TargetInfo;

use crate::connection::ExecutionContextInfo;
use crate::transport::TransportEvent;

/// An event relevant to session tracking.
#[derive(Debug, Clone, PartialEq)]
pub enum CdpEvent {
    /// `Target.attachedToTarget`: a flat session was opened for a target
    AttachedToTarget {
        /// New session id
        session_id: String,
        /// Target the session belongs to
        target: TargetInfo,
        /// Whether the target is paused waiting for the debugger
        waiting_for_debugger: bool,
    },
    /// `Target.detachedFromTarget`
    DetachedFromTarget {
        /// Session that went away
        session_id: String,
    },
    /// `Target.targetDestroyed`
    TargetDestroyed {
        /// Target that went away
        target_id: String,
    },
    /// `Runtime.executionContextCreated`
    ExecutionContextCreated {
        /// Session the context lives in
        session_id: String,
        /// The new context
        context: ExecutionContextInfo,
    },
    /// `Runtime.executionContextDestroyed`
    ExecutionContextDestroyed {
        /// Session the context lived in
        session_id: String,
        /// Context id
        id: i64,
    },
    /// `Runtime.executionContextsCleared`
    ExecutionContextsCleared {
        /// Session whose contexts were cleared
        session_id: String,
    },
    /// `Runtime.consoleAPICalled`
    ConsoleApiCalled {
        /// Emitting session, if any
        session_id: Option<String>,
        /// Console method (`log`, `warning`, `error`, ...)
        level: String,
        /// Rendered arguments
        text: String,
    },
    /// `Runtime.exceptionThrown`
    ExceptionThrown {
        /// Emitting session, if any
        session_id: Option<String>,
        /// Exception description
        text: String,
    },
    /// Anything else
    Other(String),
}

impl CdpEvent {
    /// Decode a raw transport event. Malformed payloads of known methods map to `Other`.
    pub fn parse(event: &TransportEvent) -> Self {
        let params = &event.params;
        let session = event.session_id.clone();

        let parsed = match event.method.as_str() {
            "Target.attachedToTarget" => (|| {
                let session_id = params.get("sessionId")?.as_str()?.to_string();
                let target = serde_json::from_value(params.get("targetInfo")?.clone()).ok()?;
                let waiting_for_debugger = params
                    .get("waitingForDebugger")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Some(CdpEvent::AttachedToTarget {
                    session_id,
                    target,
                    waiting_for_debugger,
                })
            })(),
            "Target.detachedFromTarget" => params
                .get("sessionId")
                .and_then(Value::as_str)
                .map(|id| CdpEvent::DetachedFromTarget {
                    session_id: id.to_string(),
                }),
            "Target.targetDestroyed" => params
                .get("targetId")
                .and_then(Value::as_str)
                .map(|id| CdpEvent::TargetDestroyed {
                    target_id: id.to_string(),
                }),
            "Runtime.executionContextCreated" => (|| {
                let session_id = session.clone()?;
                let context = ExecutionContextInfo::from_description(params.get("context")?)?;
                Some(CdpEvent::ExecutionContextCreated {
                    session_id,
                    context,
                })
            })(),
            "Runtime.executionContextDestroyed" => (|| {
                let session_id = session.clone()?;
                let id = params.get("executionContextId")?.as_i64()?;
                Some(CdpEvent::ExecutionContextDestroyed { session_id, id })
            })(),
            "Runtime.executionContextsCleared" => session
                .clone()
                .map(|session_id| CdpEvent::ExecutionContextsCleared { session_id }),
            "Runtime.consoleAPICalled" => {
                let level = params
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("log")
                    .to_string();
                let args = params
                    .get("args")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                Some(CdpEvent::ConsoleApiCalled {
                    session_id: session.clone(),
                    level,
                    text: format_console_args(args),
                })
            }
            "Runtime.exceptionThrown" => {
                let details = params.get("exceptionDetails");
                let text = details
                    .and_then(|d| d.get("exception"))
                    .and_then(|e| e.get("description"))
                    .and_then(Value::as_str)
                    .or_else(|| details.and_then(|d| d.get("text")).and_then(Value::as_str))
                    .unwrap_or("Uncaught exception")
                    .to_string();
                Some(CdpEvent::ExceptionThrown {
                    session_id: session.clone(),
                    text,
                })
            }
            _ => None,
        };

        parsed.unwrap_or_else(|| CdpEvent::Other(event.method.clone()))
    }
}

/// Render `Runtime.RemoteObject` console arguments as a single line.
pub fn format_console_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| {
            if let Some(value) = arg.get("value") {
                match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            } else if let Some(desc) = arg.get("description").and_then(Value::as_str) {
                desc.to_string()
            } else if let Some(unserializable) =
                arg.get("unserializableValue").and_then(Value::as_str)
            {
                unserializable.to_string()
            } else {
                arg.get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("undefined")
                    .to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: Value, session: Option<&str>) -> TransportEvent {
        TransportEvent {
            method: method.to_string(),
            params,
            session_id: session.map(str::to_string),
        }
    }

    #[test]
    fn test_format_console_args() {
        let args = vec![
            json!({"type": "string", "value": "hello"}),
            json!({"type": "number", "value": 42}),
            json!({"type": "object", "description": "Object"}),
            json!({"type": "number", "unserializableValue": "NaN"}),
            json!({"type": "undefined"}),
        ];
        assert_eq!(format_console_args(&args), "hello 42 Object NaN undefined");
    }

    #[test]
    fn test_parse_console_api_called() {
        let parsed = CdpEvent::parse(&event(
            "Runtime.consoleAPICalled",
            json!({"type": "warning", "args": [{"type": "string", "value": "careful"}]}),
            Some("S1"),
        ));
        assert_eq!(
            parsed,
            CdpEvent::ConsoleApiCalled {
                session_id: Some("S1".to_string()),
                level: "warning".to_string(),
                text: "careful".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_exception_prefers_description() {
        let parsed = CdpEvent::parse(&event(
            "Runtime.exceptionThrown",
            json!({"exceptionDetails": {
                "text": "Uncaught",
                "exception": {"description": "TypeError: x is undefined"}
            }}),
            None,
        ));
        match parsed {
            CdpEvent::ExceptionThrown { text, .. } => assert_eq!(text, "TypeError: x is undefined"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_attached_to_target() {
        let parsed = CdpEvent::parse(&event(
            "Target.attachedToTarget",
            json!({
                "sessionId": "S9",
                "targetInfo": {"targetId": "T9", "type": "page", "title": "", "url": "about:blank", "attached": true},
                "waitingForDebugger": true
            }),
            None,
        ));
        match parsed {
            CdpEvent::AttachedToTarget {
                session_id,
                target,
                waiting_for_debugger,
            } => {
                assert_eq!(session_id, "S9");
                assert_eq!(target.target_id, "T9");
                assert!(waiting_for_debugger);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_execution_context_created() {
        let parsed = CdpEvent::parse(&event(
            "Runtime.executionContextCreated",
            json!({"context": {
                "id": 7,
                "origin": "chrome-extension://abcdefghijklmnopabcdefghijklmnop",
                "name": "Demo",
                "auxData": {"isDefault": false, "type": "isolated", "frameId": "F1"}
            }}),
            Some("S1"),
        ));
        match parsed {
            CdpEvent::ExecutionContextCreated {
                session_id,
                context,
            } => {
                assert_eq!(session_id, "S1");
                assert_eq!(context.id, 7);
                assert!(!context.is_default);
                assert_eq!(context.world_type.as_deref(), Some("isolated"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_context_events_without_session_are_other() {
        let parsed = CdpEvent::parse(&event(
            "Runtime.executionContextsCleared",
            json!({}),
            None,
        ));
        assert_eq!(
            parsed,
            CdpEvent::Other("Runtime.executionContextsCleared".to_string())
        );
    }

    #[test]
    fn test_unknown_event() {
        let parsed = CdpEvent::parse(&event("Page.loadEventFired", json!({}), Some("S1")));
        assert_eq!(parsed, CdpEvent::Other("Page.loadEventFired".to_string()));
    }
}
