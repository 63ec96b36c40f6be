//! Mock `/wsput` server built on tiny_http
//!
//! Speaks just enough of the HTTP emulation protocol for transport tests:
//! `GET /WS_PORT`, and `PUT /wsput` with init, tunnel and long-poll
//! payloads. Long-polls are held for a short window and answered either
//! with a queued push or with the current change token.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server};

use super::{failure, success};

struct State {
    ws_port_answer: Mutex<String>,
    etag: AtomicU64,
    pushes: Mutex<VecDeque<Value>>,
    fail_next: AtomicUsize,
    broken: AtomicBool,
    puts: AtomicUsize,
    tunneled: Mutex<Vec<Value>>,
    sessions: Mutex<Vec<String>>,
    poll_window: Duration,
}

pub struct MockHttpServer {
    pub base: String,
    state: Arc<State>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MockHttpServer {
    pub fn start() -> Self {
        let server = Server::http("127.0.0.1:0").expect("Failed to start test server");
        let port = server.server_addr().to_ip().expect("Not an IP listener").port();
        let state = Arc::new(State {
            ws_port_answer: Mutex::new("http".to_string()),
            etag: AtomicU64::new(1),
            pushes: Mutex::new(VecDeque::new()),
            fail_next: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
            tunneled: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            poll_window: Duration::from_millis(100),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::spawn(move || loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                match server.recv_timeout(Duration::from_millis(20)) {
                    Ok(Some(request)) => {
                        let state = Arc::clone(&state);
                        thread::spawn(move || handle(request, &state));
                    }
                    Ok(None) => {}
                    Err(_) => break,
                }
            })
        };

        Self {
            base: format!("http://127.0.0.1:{}/", port),
            state,
            stop,
            thread: Some(thread),
        }
    }

    /// Body served at `/WS_PORT`
    pub fn set_ws_port_answer(&self, answer: &str) {
        *self.state.ws_port_answer.lock() = answer.to_string();
    }

    pub fn set_etag(&self, etag: u64) {
        self.state.etag.store(etag, Ordering::SeqCst);
    }

    /// Queue a push envelope for the next long-poll
    pub fn queue_push(&self, push: Value) {
        self.state.pushes.lock().push_back(push);
    }

    /// Answer the next `n` tunneled calls with 500
    pub fn fail_next(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Answer every PUT with 500 from now on
    pub fn break_server(&self) {
        self.state.broken.store(true, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.state.puts.load(Ordering::SeqCst)
    }

    /// Inner requests received through `wsput:tunnel`
    pub fn tunneled(&self) -> Vec<Value> {
        self.state.tunneled.lock().clone()
    }

    pub fn sessions(&self) -> Vec<String> {
        self.state.sessions.lock().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn handle(mut request: Request, state: &State) {
    let url = request.url().to_string();
    let method = request.method().clone();

    match (method, url.as_str()) {
        (Method::Get, "/WS_PORT") => {
            let answer = state.ws_port_answer.lock().clone();
            respond(request, 200, answer);
        }
        (Method::Put, "/wsput") => {
            state.puts.fetch_add(1, Ordering::SeqCst);
            if state.broken.load(Ordering::SeqCst) {
                respond(request, 500, "unavailable".to_string());
                return;
            }

            let mut body = String::new();
            if request.as_reader().read_to_string(&mut body).is_err() {
                respond(request, 400, "unreadable body".to_string());
                return;
            }
            let envelope: Value = serde_json::from_str(&body).expect("Client sent invalid JSON");
            let id = envelope["id"].as_u64().expect("Client sent no id");
            let data = &envelope["data"];
            if data["type"] == "wsput:tunnel" && take_failure(state) {
                respond(request, 500, "flaky".to_string());
                return;
            }

            let reply = match data["type"].as_str() {
                Some("wsput:init") => {
                    let session = data["session"].as_str().unwrap_or_default().to_string();
                    state.sessions.lock().push(session);
                    success(
                        id,
                        json!({"type": "init", "changeBufferTime": 50, "workerProcessCount": 2}),
                    )
                }
                Some("wsput:longpoll") => success(id, long_poll(state)),
                Some("wsput:tunnel") => {
                    let inner = data["request"].clone();
                    state.tunneled.lock().push(inner.clone());
                    if inner["type"] == "Fail" {
                        failure(id, "nope")
                    } else {
                        success(id, json!({ "echo": inner }))
                    }
                }
                _ => {
                    respond(request, 400, "unknown payload".to_string());
                    return;
                }
            };
            respond(request, 200, reply.to_string());
        }
        _ => respond(request, 404, "Not Found".to_string()),
    }
}

fn take_failure(state: &State) -> bool {
    state
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn long_poll(state: &State) -> Value {
    let deadline = Instant::now() + state.poll_window;
    while Instant::now() < deadline {
        if let Some(push) = state.pushes.lock().pop_front() {
            return json!({"type": "push", "value": push});
        }
        thread::sleep(Duration::from_millis(10));
    }
    json!({"type": "etag", "value": state.etag.load(Ordering::SeqCst)})
}

fn respond(request: Request, status: i32, body: String) {
    let response = Response::from_string(body).with_status_code(status).with_header(
        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
            .expect("Static header is valid"),
    );
    let _ = request.respond(response);
}
