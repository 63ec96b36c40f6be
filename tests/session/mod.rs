//! Session, jobs and probes end to end
//!
//! Discovery runs against the tiny_http mock. For WebSocket sessions its
//! `/WS_PORT` answer points at a scripted tokio-tungstenite server that
//! plays the analysis server's side of the job protocol.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use probe_sync::rpc::ParsingRequestData;
use probe_sync::{
    pack, ClientConfig, ClientSession, ConnectionState, LocatorHandle, NodeLocator, Position,
    ProbeState, Property, RangeChange, TransportKind, TypeAtLoc,
};

use crate::common::ws_server::Responder;
use crate::common::{async_update, success, MockHttpServer, MockWsServer, ServerAction};

type Recorded = Arc<Mutex<Vec<Value>>>;

fn config_for(server: &MockHttpServer) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.server.url = server.base.clone();
    config.rpc.timeout_ms = 5_000;
    config.http.retry_delay_ms = 10;
    config
}

/// Plays the server side of evaluations and worker subscriptions:
/// property `slow` never finishes, property `broken` fails, anything else
/// reports one status and finishes with `"42"`.
fn analysis_server(recorded: Recorded) -> Responder {
    Arc::new(move |id: u64, data: &Value| {
        recorded.lock().push(data.clone());
        let job = data["job"].as_u64().unwrap_or_default();
        match data["type"].as_str() {
            Some("EvaluateProperty") => {
                let accepted = ServerAction::Send(success(
                    id,
                    json!({"response": {"type": "job", "value": job}}),
                ));
                match data["property"]["name"].as_str() {
                    Some("slow") => vec![accepted],
                    Some("broken") => vec![
                        accepted,
                        ServerAction::Send(async_update(
                            job,
                            true,
                            json!({"type": "workerTaskDone", "value": {
                                "type": "unexpectedError",
                                "value": ["NullPointerException", "  at Node.value"]
                            }}),
                        )),
                    ],
                    _ => vec![
                        accepted,
                        ServerAction::Send(async_update(
                            job,
                            false,
                            json!({"type": "status", "value": "evaluating"}),
                        )),
                        ServerAction::Send(async_update(
                            job,
                            true,
                            json!({"type": "workerTaskDone", "value": {
                                "type": "normal",
                                "value": {"response": {"type": "sync", "value": "42"}}
                            }}),
                        )),
                    ],
                }
            }
            Some("Concurrent:StopJob") => vec![ServerAction::Send(success(id, json!(true)))],
            Some("Concurrent:SubscribeToWorkerStatus") => vec![
                ServerAction::Send(success(id, json!({"subscriberId": 7}))),
                ServerAction::Send(async_update(
                    job,
                    false,
                    json!({"type": "workerStatuses", "value": ["idle", "busy"]}),
                )),
            ],
            _ => vec![ServerAction::Send(success(id, json!(null)))],
        }
    })
}

struct Harness {
    session: ClientSession,
    recorded: Recorded,
    _http: MockHttpServer,
    _ws: MockWsServer,
}

async fn websocket_session() -> Harness {
    websocket_session_greeting_after(Duration::ZERO).await
}

/// Session whose server sends its `init` push `delay` after the handshake
async fn websocket_session_greeting_after(delay: Duration) -> Harness {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let ws = MockWsServer::start_delayed(
        vec![json!({"type": "init", "changeBufferTime": 50, "workerProcessCount": 4})],
        delay,
        analysis_server(Arc::clone(&recorded)),
    )
    .await;
    let port = url::Url::parse(&ws.url)
        .unwrap()
        .port()
        .expect("mock server url has a port");

    let http = MockHttpServer::start();
    http.set_ws_port_answer(&port.to_string());

    let session = ClientSession::connect(config_for(&http)).await.unwrap();
    Harness {
        session,
        recorded,
        _http: http,
        _ws: ws,
    }
}

fn evaluations(recorded: &Recorded) -> Vec<Value> {
    recorded
        .lock()
        .iter()
        .filter(|data| data["type"] == "EvaluateProperty")
        .cloned()
        .collect()
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

async fn wait_for_probe(
    rx: &mut watch::Receiver<ProbeState>,
    pred: impl Fn(&ProbeState) -> bool,
) -> ProbeState {
    let wait = async {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            rx.changed().await.expect("probe dropped");
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("Timed out waiting for probe state")
}

fn expression_locator() -> LocatorHandle {
    LocatorHandle::mutable(NodeLocator::direct(TypeAtLoc::new(
        "Expr",
        pack(2, 3),
        pack(2, 8),
    )))
}

fn source() -> Arc<dyn Fn() -> ParsingRequestData + Send + Sync> {
    Arc::new(|| ParsingRequestData::text("class A {\n  x + y;\n}\n"))
}

#[tokio::test]
async fn test_http_session_handshake() {
    let server = MockHttpServer::start();
    let session = ClientSession::connect(config_for(&server)).await.unwrap();

    assert_eq!(session.transport().kind(), TransportKind::Http);
    let info = session.wait_for_init().await.unwrap();
    assert_eq!(info.worker_process_count, Some(2));
    assert_eq!(session.change_buffer(), Duration::from_millis(50));

    let reply = session.call(json!({"type": "Ping"})).await.unwrap();
    assert_eq!(reply, json!({"echo": {"type": "Ping"}}));

    session.close().await;
    assert_eq!(
        *session.connection_state().borrow(),
        ConnectionState::Closed
    );
}

#[tokio::test]
async fn test_websocket_session_picks_up_init() {
    let harness = websocket_session().await;
    let session = &harness.session;

    assert_eq!(session.transport().kind(), TransportKind::WebSocket);
    let info = session.wait_for_init().await.unwrap();
    assert_eq!(info.worker_process_count, Some(4));
    assert_eq!(session.change_buffer(), Duration::from_millis(50));
    session.close().await;
}

#[tokio::test]
async fn test_probe_opened_after_connect_uses_server_debounce() {
    let harness = websocket_session_greeting_after(Duration::from_millis(200)).await;
    let session = &harness.session;

    // no explicit wait: connect already saw the late init
    let probe = session.open_probe(&expression_locator(), Property::named("value"), source());
    assert_eq!(probe.debounce(), Duration::from_millis(50));

    probe.close().await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_probe_follows_edits_and_reevaluates() {
    let harness = websocket_session().await;
    let session = &harness.session;
    session.wait_for_init().await.unwrap();

    let caller_locator = expression_locator();
    let probe = session.open_probe(&caller_locator, Property::named("value"), source());
    let mut state = probe.subscribe();

    let ready = wait_for_probe(&mut state, |s| matches!(s, ProbeState::Ready(_))).await;
    assert_eq!(ready, ProbeState::Ready(json!("42")));
    let first = evaluations(&harness.recorded);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["locator"]["result"]["start"], pack(2, 3));
    assert_eq!(first[0]["property"]["name"], "value");

    // a newline above the node moves it down one line
    session.apply_range_changes(&[RangeChange::insert(Position::new(1, 1), "\n")]);
    assert_eq!(probe.locator().result.start, pack(3, 3));
    assert_eq!(probe.locator().result.end, pack(3, 8));
    // the caller's locator is a separate copy
    assert_eq!(caller_locator.get().result.start, pack(2, 3));

    eventually("debounced re-evaluation", || {
        evaluations(&harness.recorded).len() == 2
    })
    .await;
    let second = &evaluations(&harness.recorded)[1];
    assert_eq!(second["locator"]["result"]["start"], pack(3, 3));

    let ready = wait_for_probe(&mut state, |s| matches!(s, ProbeState::Ready(_))).await;
    assert_eq!(ready, ProbeState::Ready(json!("42")));
    assert_eq!(probe.in_flight_job(), None);

    probe.close().await.unwrap();
    assert!(session.bus().is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_probe_reports_job_failure() {
    let harness = websocket_session().await;
    let session = &harness.session;
    session.wait_for_init().await.unwrap();

    let probe = session.open_probe(&expression_locator(), Property::named("broken"), source());
    let mut state = probe.subscribe();

    match wait_for_probe(&mut state, |s| matches!(s, ProbeState::Failed(_))).await {
        ProbeState::Failed(message) => assert!(message.contains("NullPointerException")),
        other => panic!("Expected failure, got {:?}", other),
    }
    assert_eq!(session.jobs().active_jobs(), 0);
    session.close().await;
}

#[tokio::test]
async fn test_closing_probe_stops_its_job() {
    let harness = websocket_session().await;
    let session = &harness.session;
    session.wait_for_init().await.unwrap();

    let probe = session.open_probe(&expression_locator(), Property::named("slow"), source());
    eventually("evaluation request", || {
        evaluations(&harness.recorded).len() == 1
    })
    .await;
    let job = evaluations(&harness.recorded)[0]["job"].as_u64().unwrap();
    eventually("job accepted", || probe.in_flight_job() == Some(job)).await;

    probe.close().await.unwrap();

    let stops: Vec<Value> = harness
        .recorded
        .lock()
        .iter()
        .filter(|data| data["type"] == "Concurrent:StopJob")
        .cloned()
        .collect();
    assert_eq!(stops, vec![json!({"type": "Concurrent:StopJob", "job": job})]);
    eventually("job table cleared", || session.jobs().active_jobs() == 0).await;
    session.close().await;
}

#[tokio::test]
async fn test_worker_status_subscription() {
    let harness = websocket_session().await;
    let session = &harness.session;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = session
        .subscribe_worker_status(move |statuses: &[String]| {
            let _ = tx.send(statuses.to_vec());
        })
        .await
        .unwrap();
    assert_eq!(subscription.subscriber_id, 7);

    let statuses = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(statuses, vec!["idle".to_string(), "busy".to_string()]);

    let job = subscription.job;
    session.unsubscribe_worker_status(subscription).await.unwrap();
    assert!(!session.jobs().is_active(job));
    let last = harness.recorded.lock().last().cloned().unwrap();
    assert_eq!(
        last,
        json!({"type": "Concurrent:UnsubscribeFromWorkerStatus", "job": job, "subscriberId": 7})
    );
    session.close().await;
}
