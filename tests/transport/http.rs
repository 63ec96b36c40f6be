//! HTTP long-poll transport against a tiny_http mock server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use url::Url;

use probe_sync::rpc::discovery::{self, TransportChoice};
use probe_sync::rpc::{HttpOptions, HttpTransport, RpcCore, RpcTransport};
use probe_sync::{ConnectionState, SyncError};

use crate::common::{wait_for_state, MockHttpServer};

fn fast_options() -> HttpOptions {
    HttpOptions {
        retry_attempts: 3,
        retry_delay: Duration::from_millis(10),
        longpoll_failure_budget: 3,
        longpoll_timeout: Duration::from_secs(5),
    }
}

fn core() -> Arc<RpcCore> {
    Arc::new(RpcCore::new(Duration::from_secs(5)))
}

fn counter(core: &RpcCore, kind: &str) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&hits);
    core.on(
        kind,
        Arc::new(move |_: &Value| {
            counted.fetch_add(1, Ordering::SeqCst);
        }),
    );
    hits
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("Timed out waiting for {}", what);
}

async fn connect(server: &MockHttpServer, core: Arc<RpcCore>) -> HttpTransport {
    let base = Url::parse(&server.base).unwrap();
    HttpTransport::connect(&base, core, fast_options())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_init_handshake_and_tunnel() {
    let server = MockHttpServer::start();
    let core = core();
    let inits = counter(&core, "init");

    let transport = connect(&server, Arc::clone(&core)).await;
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(core.state(), ConnectionState::Connected);

    let sessions = server.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(uuid::Uuid::parse_str(&sessions[0]).is_ok());
    assert_eq!(transport.session(), sessions[0]);

    let reply = transport.call(json!({"type": "Ping"}), None).await.unwrap();
    assert_eq!(reply, json!({"echo": {"type": "Ping"}}));
    assert_eq!(server.tunneled(), vec![json!({"type": "Ping"})]);

    transport.close().await;
}

#[tokio::test]
async fn test_failure_reply_is_remote_error() {
    let server = MockHttpServer::start();
    let transport = connect(&server, core()).await;

    match transport.call(json!({"type": "Fail"}), None).await {
        Err(SyncError::Remote(message)) => assert_eq!(message, "nope"),
        other => panic!("Expected remote failure, got {:?}", other),
    }
    transport.close().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockHttpServer::start();
    let transport = connect(&server, core()).await;

    server.fail_next(2);
    let reply = transport.call(json!({"type": "Ping"}), None).await.unwrap();
    assert_eq!(reply["echo"]["type"], "Ping");
    // failed attempts never reach the tunnel handler
    assert_eq!(server.tunneled().len(), 1);
    transport.close().await;
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockHttpServer::start();
    let transport = connect(&server, core()).await;

    server.fail_next(3);
    match transport.call(json!({"type": "Ping"}), None).await {
        Err(SyncError::Http { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("Expected HTTP failure, got {:?}", other),
    }
    assert_eq!(transport.core().correlator().pending_count(), 0);
    transport.close().await;
}

#[tokio::test]
async fn test_etag_change_raises_refresh() {
    let server = MockHttpServer::start();
    let core = core();
    let refreshes = counter(&core, "refresh");
    let transport = connect(&server, Arc::clone(&core)).await;

    // several polls observe the same token: no refresh
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);

    server.set_etag(2);
    eventually("refresh push", || refreshes.load(Ordering::SeqCst) == 1).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    transport.close().await;
}

#[tokio::test]
async fn test_longpoll_push_is_dispatched() {
    let server = MockHttpServer::start();
    let core = core();
    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = Arc::clone(&received);
        core.on(
            "workerLog",
            Arc::new(move |body: &Value| received.lock().push(body.clone())),
        );
    }
    let transport = connect(&server, Arc::clone(&core)).await;

    server.queue_push(json!({"type": "workerLog", "line": "started"}));
    eventually("pushed message", || !received.lock().is_empty()).await;
    assert_eq!(received.lock()[0]["line"], "started");
    transport.close().await;
}

#[tokio::test]
async fn test_failure_budget_declares_connection_lost() {
    let server = MockHttpServer::start();
    let transport = connect(&server, core()).await;
    let mut state = transport.connection_state();

    server.break_server();
    let lost = wait_for_state(&mut state, |s| matches!(s, ConnectionState::Lost { .. })).await;
    assert_eq!(
        lost,
        ConnectionState::Lost {
            ever_received: true
        }
    );
    assert!(matches!(
        transport.call(json!({"type": "Ping"}), None).await,
        Err(SyncError::ConnectionLost { .. })
    ));
}

#[tokio::test]
async fn test_init_failure_never_received() {
    let server = MockHttpServer::start();
    server.break_server();
    let core = core();

    let base = Url::parse(&server.base).unwrap();
    let err = HttpTransport::connect(&base, Arc::clone(&core), fast_options())
        .await
        .err()
        .expect("init against a broken server must fail");
    assert!(matches!(err, SyncError::Http { attempts: 3, .. }));
    assert_eq!(
        core.state(),
        ConnectionState::Lost {
            ever_received: false
        }
    );
}

#[tokio::test]
async fn test_discovery_answers() {
    let server = MockHttpServer::start();
    let base = Url::parse(&server.base).unwrap();
    let client = reqwest::Client::new();

    assert_eq!(
        discovery::discover(&client, &base).await.unwrap(),
        TransportChoice::Http { base: base.clone() }
    );

    server.set_ws_port_answer("9001");
    assert_eq!(
        discovery::discover(&client, &base).await.unwrap(),
        TransportChoice::WebSocket {
            url: Url::parse("ws://127.0.0.1:9001/").unwrap()
        }
    );

    server.set_ws_port_answer("not-a-port");
    assert!(matches!(
        discovery::discover(&client, &base).await,
        Err(SyncError::Discovery { .. })
    ));
}
