//! Common test utilities for probe-sync integration tests
//!
//! This module provides:
//! - `MockWsServer`, a scripted WebSocket analysis server
//! - `MockHttpServer`, a tiny_http server speaking the `/wsput` protocol
//! - helpers for building envelopes and positions

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod http_server;

pub use http_server::MockHttpServer;
pub use ws_server::{MockWsServer, ServerAction};

use std::time::Duration;

use probe_sync::Position;
use serde_json::{json, Value};
use tokio::sync::watch;

use probe_sync::ConnectionState;

/// `{type: rpc, id, data: {type: success, value}}`
pub fn success(id: u64, value: Value) -> Value {
    json!({"type": "rpc", "id": id, "data": {"type": "success", "value": value}})
}

/// `{type: rpc, id, data: {type: failureMsg, value}}`
pub fn failure(id: u64, message: &str) -> Value {
    json!({"type": "rpc", "id": id, "data": {"type": "failureMsg", "value": message}})
}

/// Job update push
pub fn async_update(job: u64, is_final: bool, value: Value) -> Value {
    json!({"type": "asyncUpdate", "job": job, "isFinalUpdate": is_final, "value": value})
}

/// 1-based position of char `offset` in `doc`
pub fn position_at(doc: &str, offset: usize) -> Position {
    let mut line = 1;
    let mut col = 1;
    for ch in doc.chars().take(offset) {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    Position::new(line, col)
}

/// Wait (real time, bounded) until the connection state satisfies `pred`
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    pred: impl Fn(ConnectionState) -> bool,
) -> ConnectionState {
    let wait = async {
        loop {
            let current = *rx.borrow_and_update();
            if pred(current) {
                return current;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("Timed out waiting for connection state")
}
