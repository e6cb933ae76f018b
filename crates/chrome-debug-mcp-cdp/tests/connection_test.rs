//! BrowserConnection behavior against the scripted browser.

use std::sync::Arc;
use std::time::Duration;

use chrome_debug_mcp_cdp::testing::{MockBrowser, MockConnector, MockProcess};
use chrome_debug_mcp_cdp::{BrowserConnection, BrowserConnector, BrowserProcess, CdpEvent};
use chrome_debug_mcp_core::{Endpoint, Error};
use serde_json::json;

async fn connect(browser: &MockBrowser) -> (BrowserConnection, MockConnector) {
    let connector = MockConnector::new(browser.clone());
    let endpoint = Endpoint::default();
    let connected = connector
        .connect(&endpoint, Duration::from_secs(1))
        .await
        .unwrap();
    let conn = BrowserConnection::new(endpoint, connected, None, Duration::from_secs(1));
    (conn, connector)
}

#[tokio::test]
async fn test_page_targets_keep_browser_order() {
    let browser = MockBrowser::new();
    browser.add_page("P2", "https://b.example/");
    browser.add_target(MockBrowser::target(
        "W1",
        "service_worker",
        "chrome-extension://abcdefghijklmnopabcdefghijklmnop/bg.js",
    ));
    browser.add_page("P1", "https://a.example/");

    let (conn, _) = connect(&browser).await;
    let pages = conn.page_targets().await.unwrap();
    let ids: Vec<_> = pages.iter().map(|p| p.target_id.as_str()).collect();
    assert_eq!(ids, vec!["P2", "P1"]);

    let all = conn.list_targets().await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_enumeration_failure_is_enumeration_error() {
    let browser = MockBrowser::new();
    browser.set_fail_enumeration(true);
    let (conn, _) = connect(&browser).await;

    let err = conn.page_targets().await.unwrap_err();
    assert!(matches!(err, Error::Enumeration(_)));
}

#[tokio::test]
async fn test_attach_session_is_cached() {
    let browser = MockBrowser::new();
    browser.add_page("P1", "https://a.example/");
    let (conn, _) = connect(&browser).await;
    let target = conn.list_targets().await.unwrap().remove(0);

    let first = conn.attach_session(&target).await.unwrap();
    let second = conn.attach_session(&target).await.unwrap();
    assert_eq!(first, "S-P1");
    assert_eq!(first, second);
    assert_eq!(browser.call_count("Target.attachToTarget"), 1);
    assert_eq!(browser.call_count("Runtime.enable"), 1);
}

#[tokio::test]
async fn test_evaluate_returns_value_and_surfaces_exceptions() {
    let browser = MockBrowser::new();
    browser.add_page("P1", "https://a.example/");
    browser.on_evaluate("document.title", json!("Example"));
    browser.on_evaluate_throw("boom()", "ReferenceError: boom is not defined");
    let (conn, _) = connect(&browser).await;
    let target = conn.list_targets().await.unwrap().remove(0);
    let session = conn.attach_session(&target).await.unwrap();

    let value = conn.evaluate(&session, "document.title", None).await.unwrap();
    assert_eq!(value, json!("Example"));

    let err = conn.evaluate(&session, "boom()", Some(4)).await.unwrap_err();
    match err {
        Error::Protocol { method, message } => {
            assert_eq!(method, "Runtime.evaluate");
            assert!(message.contains("boom is not defined"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let undefined = conn.evaluate(&session, "void 0", None).await.unwrap();
    assert!(undefined.is_null());
}

#[tokio::test]
async fn test_dead_transport_is_not_connected() {
    let browser = MockBrowser::new();
    let (conn, connector) = connect(&browser).await;
    assert!(conn.is_connected());

    connector.last_transport().unwrap().kill();
    assert!(!conn.is_connected());
    assert!(matches!(conn.probe().await, Err(Error::NotConnected)));
    assert!(conn.next_event().await.is_none());
}

#[tokio::test]
async fn test_close_kills_launched_process() {
    let browser = MockBrowser::new();
    let connector = MockConnector::new(browser.clone());
    let endpoint = Endpoint::new("localhost", 9333);
    let connected = connector
        .connect(&endpoint, Duration::from_secs(1))
        .await
        .unwrap();
    let process = MockProcess::default();
    let boxed: Box<dyn BrowserProcess> = Box::new(process.clone());
    let conn = Arc::new(BrowserConnection::new(
        endpoint,
        connected,
        Some(boxed),
        Duration::from_secs(1),
    ));
    assert!(conn.is_launched());
    assert!(conn.process_exit().await.is_none());

    conn.close().await;
    conn.close().await;
    assert!(process.was_killed());
    assert!(!conn.is_connected());
    assert_eq!(connector.live_transports(), 0);
}

#[tokio::test]
async fn test_events_feed_session_index() {
    let browser = MockBrowser::new();
    let (conn, connector) = connect(&browser).await;
    let transport = connector.last_transport().unwrap();

    transport.push_event(
        "Target.attachedToTarget",
        json!({
            "sessionId": "S-P7",
            "targetInfo": {"targetId": "P7", "type": "page", "title": "", "url": "https://c.example/", "attached": true},
            "waitingForDebugger": false
        }),
        None,
    );
    transport.push_event(
        "Runtime.executionContextCreated",
        json!({"context": {
            "id": 11,
            "origin": "chrome-extension://abcdefghijklmnopabcdefghijklmnop",
            "name": "Demo",
            "auxData": {"isDefault": false, "type": "isolated"}
        }}),
        Some("S-P7"),
    );

    for _ in 0..2 {
        let raw = conn.next_event().await.unwrap();
        conn.sessions().apply(&CdpEvent::parse(&raw));
    }

    assert_eq!(conn.sessions().session_for_target("P7").as_deref(), Some("S-P7"));
    let scripts = conn.sessions().content_script_contexts();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].1.id, 11);
}

#[tokio::test]
async fn test_enable_target_discovery_uses_flat_auto_attach() {
    let browser = MockBrowser::new();
    let (conn, _) = connect(&browser).await;
    conn.enable_target_discovery().await.unwrap();

    let calls = browser.calls();
    let auto_attach = calls
        .iter()
        .find(|(_, method, _)| method == "Target.setAutoAttach")
        .unwrap();
    assert_eq!(auto_attach.2["flatten"], json!(true));
    assert_eq!(browser.call_count("Target.setDiscoverTargets"), 1);
}
