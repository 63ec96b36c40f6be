//! Transport abstraction
//!
//! Both transport strategies share one [`RpcCore`]: the request correlator,
//! the push-handler table and the connection state for a single session.
//! The core is created before connecting (so handlers for pushes that arrive
//! right after the handshake are already installed) and drained when the
//! connection goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{Result, SyncError};

use super::correlator::{EnvelopeSink, RequestCorrelator};
use super::protocol::{Inbound, Request};

/// Handler for a named server push. Receives the whole envelope.
pub type PushHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Lifecycle of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// The connection dropped or the retry budget ran out
    Lost { ever_received: bool },
    /// Closed locally
    Closed,
}

/// Which strategy a transport uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebSocket => write!(f, "websocket"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Per-session routing state shared by every transport strategy
pub struct RpcCore {
    correlator: RequestCorrelator,
    handlers: Mutex<HashMap<String, Vec<PushHandler>>>,
    received_any: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

impl RpcCore {
    pub fn new(default_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            correlator: RequestCorrelator::new(default_timeout),
            handlers: Mutex::new(HashMap::new()),
            received_any: AtomicBool::new(false),
            state,
        }
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    /// Register a handler for pushes of type `kind`
    pub fn on(&self, kind: &str, handler: PushHandler) {
        self.handlers
            .lock()
            .entry(kind.to_string())
            .or_default()
            .push(handler);
    }

    /// Route a raw inbound text frame. Never fails: malformed or unroutable
    /// messages are logged and dropped.
    pub fn handle_text(&self, text: &str) {
        self.received_any.store(true, Ordering::SeqCst);
        match Inbound::parse(text) {
            Ok(inbound) => self.route(inbound),
            Err(e) => tracing::warn!("Dropping malformed message: {} ({})", e, truncate(text)),
        }
    }

    /// Route an already-decoded inbound message
    pub fn handle_value(&self, value: Value) {
        self.received_any.store(true, Ordering::SeqCst);
        match Inbound::from_value(value) {
            Ok(inbound) => self.route(inbound),
            Err(e) => tracing::warn!("Dropping malformed message: {}", e),
        }
    }

    fn route(&self, inbound: Inbound) {
        match inbound {
            Inbound::Reply { id, reply } => {
                self.correlator.resolve(id, reply);
            }
            Inbound::Push { kind, body } => self.dispatch_push(&kind, &body),
        }
    }

    /// Invoke every handler registered for `kind`
    pub fn dispatch_push(&self, kind: &str, body: &Value) {
        let handlers = self.handlers.lock().get(kind).cloned();
        match handlers {
            Some(handlers) if !handlers.is_empty() => {
                for handler in handlers {
                    handler(body);
                }
            }
            _ => tracing::warn!("No handler for push type '{}', dropping", kind),
        }
    }

    /// Record that the server answered, for transports that settle replies
    /// outside of [`RpcCore::handle_text`]
    pub fn note_received(&self) {
        self.received_any.store(true, Ordering::SeqCst);
    }

    pub fn ever_received(&self) -> bool {
        self.received_any.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Publish `Connected` unless the connection already ended
    pub fn mark_connected(&self) {
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Connecting {
                return false;
            }
            *state = ConnectionState::Connected;
            true
        });
    }

    /// Connection dropped: reject everything pending and publish `Lost`
    pub fn mark_lost(&self) {
        if self.is_finished() {
            return;
        }
        let ever_received = self.ever_received();
        tracing::info!(
            "Connection lost ({})",
            if ever_received {
                "after receiving messages"
            } else {
                "never received a message"
            }
        );
        self.correlator
            .drain(|| SyncError::ConnectionLost { ever_received });
        self.state
            .send_replace(ConnectionState::Lost { ever_received });
    }

    /// Closed locally: reject everything pending and publish `Closed`
    pub fn mark_closed(&self) {
        if self.is_finished() {
            return;
        }
        self.correlator.drain(|| SyncError::ConnectionClosed);
        self.state.send_replace(ConnectionState::Closed);
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Lost { .. } | ConnectionState::Closed
        )
    }

    /// Make a correlated call through `sink`, failing fast once finished
    pub async fn call(
        &self,
        sink: &dyn EnvelopeSink,
        payload: Value,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        match self.state() {
            ConnectionState::Lost { ever_received } => {
                return Err(SyncError::ConnectionLost { ever_received })
            }
            ConnectionState::Closed => return Err(SyncError::ConnectionClosed),
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }
        self.correlator.call(sink, payload, deadline).await
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Request/response channel to the analysis server
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send one request payload and wait for its reply
    async fn call(&self, payload: Value, deadline: Option<Duration>) -> Result<Value>;

    /// Register a handler for a named server push
    fn on(&self, kind: &str, handler: PushHandler);

    /// Watch the connection lifecycle
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    fn kind(&self) -> TransportKind;

    /// Close the connection and reject pending calls
    async fn close(&self);
}

/// Send a typed request and decode its reply
pub async fn request<T: DeserializeOwned>(
    transport: &dyn RpcTransport,
    request: &Request,
) -> Result<T> {
    let value = transport.call(request.to_payload()?, None).await?;
    Ok(serde_json::from_value(value)?)
}
