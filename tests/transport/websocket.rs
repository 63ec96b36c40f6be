//! WebSocket transport against a scripted tokio-tungstenite server

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use probe_sync::rpc::{RpcCore, RpcTransport, WebSocketTransport};
use probe_sync::{ConnectionState, SyncError};

use crate::common::{failure, success, wait_for_state, MockWsServer, ServerAction};

fn echo() -> Arc<dyn Fn(u64, &Value) -> Vec<ServerAction> + Send + Sync> {
    Arc::new(|id: u64, data: &Value| match data["type"].as_str() {
        Some("Fail") => vec![ServerAction::Send(failure(id, "no such property"))],
        Some("Slow") => vec![],
        Some("Bye") => vec![ServerAction::Close],
        _ => vec![ServerAction::Send(success(id, json!({ "echo": data })))],
    })
}

fn core() -> Arc<RpcCore> {
    Arc::new(RpcCore::new(Duration::from_secs(5)))
}

#[tokio::test]
async fn test_init_push_and_round_trip() {
    let server = MockWsServer::start(
        vec![json!({"type": "init", "changeBufferTime": 300})],
        echo(),
    )
    .await;
    let core = core();
    let (tx, mut rx) = mpsc::unbounded_channel();
    core.on(
        "init",
        Arc::new(move |body: &Value| {
            let _ = tx.send(body.clone());
        }),
    );

    let transport = WebSocketTransport::connect(&server.url, Arc::clone(&core))
        .await
        .unwrap();
    let init = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(init["changeBufferTime"], 300);

    let reply = transport.call(json!({"type": "Ping"}), None).await.unwrap();
    assert_eq!(reply, json!({"echo": {"type": "Ping"}}));
    assert_eq!(core.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_replies_out_of_order() {
    // hold the first request until the second arrives, then answer both
    // in reverse
    let held: Arc<Mutex<Option<(u64, Value)>>> = Arc::new(Mutex::new(None));
    let responder = {
        let held = Arc::clone(&held);
        Arc::new(move |id: u64, data: &Value| {
            let mut held = held.lock();
            match held.take() {
                None => {
                    *held = Some((id, data.clone()));
                    vec![]
                }
                Some((first_id, first)) => vec![
                    ServerAction::Send(success(id, data["n"].clone())),
                    ServerAction::Send(success(first_id, first["n"].clone())),
                ],
            }
        })
    };
    let server = MockWsServer::start(vec![], responder).await;
    let transport = WebSocketTransport::connect(&server.url, core()).await.unwrap();

    let (a, b) = tokio::join!(
        transport.call(json!({"type": "Eval", "n": 1}), None),
        transport.call(json!({"type": "Eval", "n": 2}), None),
    );
    assert_eq!(a.unwrap(), json!(1));
    assert_eq!(b.unwrap(), json!(2));
    assert_eq!(transport.core().correlator().pending_count(), 0);
}

#[tokio::test]
async fn test_failure_reply_is_remote_error() {
    let server = MockWsServer::start(vec![], echo()).await;
    let transport = WebSocketTransport::connect(&server.url, core()).await.unwrap();

    match transport.call(json!({"type": "Fail"}), None).await {
        Err(SyncError::Remote(message)) => assert_eq!(message, "no such property"),
        other => panic!("Expected remote failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let server = MockWsServer::start(vec![], echo()).await;
    let transport = WebSocketTransport::connect(&server.url, core()).await.unwrap();

    let err = transport
        .call(json!({"type": "Slow"}), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Timeout { .. }));
    assert_eq!(transport.core().correlator().pending_count(), 0);

    // the session is still usable
    assert!(transport.call(json!({"type": "Ping"}), None).await.is_ok());
}

#[tokio::test]
async fn test_server_close_rejects_pending_and_reports_lost() {
    let server = MockWsServer::start(vec![json!({"type": "init"})], echo()).await;
    let core = core();
    let transport = WebSocketTransport::connect(&server.url, Arc::clone(&core))
        .await
        .unwrap();
    let mut state = transport.connection_state();

    // make sure the greeting has been read before the socket goes away
    assert!(transport.call(json!({"type": "Ping"}), None).await.is_ok());

    let err = transport.call(json!({"type": "Bye"}), None).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::ConnectionLost {
            ever_received: true
        }
    ));
    let lost = wait_for_state(&mut state, |s| matches!(s, ConnectionState::Lost { .. })).await;
    assert_eq!(
        lost,
        ConnectionState::Lost {
            ever_received: true
        }
    );

    // later calls fail fast
    assert!(matches!(
        transport.call(json!({"type": "Ping"}), None).await,
        Err(SyncError::ConnectionLost { .. })
    ));
}

#[tokio::test]
async fn test_refused_connection_never_received() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let core = core();
    let result = WebSocketTransport::connect(&format!("ws://{}/", addr), Arc::clone(&core)).await;
    assert!(result.is_err());
    assert_eq!(
        core.state(),
        ConnectionState::Lost {
            ever_received: false
        }
    );
}

#[tokio::test]
async fn test_local_close() {
    let server = MockWsServer::start(vec![], echo()).await;
    let transport = WebSocketTransport::connect(&server.url, core()).await.unwrap();

    transport.close().await;
    assert_eq!(*transport.connection_state().borrow(), ConnectionState::Closed);
    assert!(matches!(
        transport.call(json!({"type": "Ping"}), None).await,
        Err(SyncError::ConnectionClosed)
    ));
}
