//! HTTP long-poll transport
//!
//! Emulates the persistent socket when one isn't available. Every call is a
//! single `PUT /wsput` carrying the JSON envelope, retried with a fixed
//! backoff on transport errors and non-OK statuses. Server push is emulated
//! with a perpetual long-poll:
//!
//! ```text
//!   client                                   server
//!     │  wsput:init {session}                  │
//!     │ ─────────────────────────────────────► │
//!     │ ◄───────────── init info ───────────── │   (dispatched as `init`)
//!     │  wsput:longpoll {session, etag}        │
//!     │ ─────────────────────────────────────► │
//!     │ ◄──── {etag: n} | {push: envelope} ─── │   (reissued immediately)
//!     │  wsput:tunnel {session, request}       │
//!     │ ─────────────────────────────────────► │
//!     │ ◄──────────── rpc reply ────────────── │
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SyncError};

use super::correlator::EnvelopeSink;
use super::protocol::{
    Inbound, LongPollReply, OutboundMessage, WsPutRequest, PUSH_INIT, PUSH_REFRESH,
};
use super::transport::{ConnectionState, PushHandler, RpcCore, RpcTransport, TransportKind};

/// Retry and long-poll tuning for the HTTP transport
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Attempts per call before giving up (default: 3)
    pub retry_attempts: u32,
    /// Delay between attempts (default: 1s)
    pub retry_delay: Duration,
    /// Consecutive long-poll failures tolerated before the connection is lost
    pub longpoll_failure_budget: u32,
    /// Deadline for a single long-poll round trip
    pub longpoll_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            longpoll_failure_budget: 3,
            longpoll_timeout: Duration::from_secs(60),
        }
    }
}

struct Tunnel {
    client: reqwest::Client,
    endpoint: Url,
    core: Arc<RpcCore>,
}

impl Tunnel {
    async fn put_once(&self, envelope: &OutboundMessage) -> Result<String> {
        let response = self
            .client
            .put(self.endpoint.clone())
            .json(envelope)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Http {
                attempts: 1,
                message: format!("{} returned {}", self.endpoint, response.status()),
            });
        }
        Ok(response.text().await?)
    }

    async fn put(&self, envelope: &OutboundMessage, attempts: u32, delay: Duration) -> Result<String> {
        let attempts = attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.put_once(envelope).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    tracing::warn!("PUT attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(SyncError::Http {
            attempts,
            message: last_error,
        })
    }
}

/// Delivers an envelope as one HTTP round trip and settles its call with
/// the response body
struct HttpSink {
    tunnel: Arc<Tunnel>,
    attempts: u32,
    delay: Duration,
}

#[async_trait]
impl EnvelopeSink for HttpSink {
    async fn deliver(&self, envelope: OutboundMessage) -> Result<()> {
        let OutboundMessage::Rpc { id, .. } = &envelope;
        let id = *id;
        let body = self.tunnel.put(&envelope, self.attempts, self.delay).await?;
        self.tunnel.core.note_received();

        match Inbound::parse(&body)? {
            Inbound::Reply { id: reply_id, reply } if reply_id == id => {
                self.tunnel.core.correlator().resolve(id, reply);
                Ok(())
            }
            other => Err(SyncError::protocol(format!(
                "unexpected response to request {}: {:?}",
                id, other
            ))),
        }
    }
}

/// HTTP emulation transport strategy
pub struct HttpTransport {
    core: Arc<RpcCore>,
    session: String,
    sink: HttpSink,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Open a session against `base`, run the init handshake and start the
    /// long-poll loop
    pub async fn connect(base: &Url, core: Arc<RpcCore>, options: HttpOptions) -> Result<Self> {
        let endpoint = base.join("wsput").map_err(|e| SyncError::Discovery {
            message: format!("invalid base url {}: {}", base, e),
        })?;
        let client = reqwest::Client::builder().build()?;
        let session = Uuid::new_v4().to_string();
        tracing::info!("Opening HTTP session {} at {}", session, endpoint);

        let tunnel = Arc::new(Tunnel {
            client,
            endpoint,
            core: Arc::clone(&core),
        });
        let sink = HttpSink {
            tunnel: Arc::clone(&tunnel),
            attempts: options.retry_attempts,
            delay: options.retry_delay,
        };

        let init_payload = serde_json::to_value(WsPutRequest::Init {
            session: session.clone(),
        })?;
        let init = match core.call(&sink, init_payload, None).await {
            Ok(init) => init,
            Err(e) => {
                core.mark_lost();
                return Err(e);
            }
        };
        core.mark_connected();
        core.dispatch_push(PUSH_INIT, &init);

        let poller = tokio::spawn(long_poll(tunnel, session.clone(), options));

        Ok(Self {
            core,
            session,
            sink,
            poller: Mutex::new(Some(poller)),
        })
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn core(&self) -> &Arc<RpcCore> {
        &self.core
    }
}

async fn long_poll(tunnel: Arc<Tunnel>, session: String, options: HttpOptions) {
    let core = Arc::clone(&tunnel.core);
    let sink = HttpSink {
        tunnel,
        attempts: 1,
        delay: Duration::ZERO,
    };
    let mut etag: Option<u64> = None;
    let mut failures = 0u32;

    while !core.is_finished() {
        let payload = match serde_json::to_value(WsPutRequest::LongPoll {
            session: session.clone(),
            etag: etag.unwrap_or(0),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode long-poll request: {}", e);
                break;
            }
        };

        match core.call(&sink, payload, Some(options.longpoll_timeout)).await {
            Ok(value) => {
                failures = 0;
                match serde_json::from_value::<LongPollReply>(value) {
                    Ok(LongPollReply::Etag(tag)) => {
                        if etag.is_some_and(|prev| prev != tag) {
                            tracing::debug!("Change token moved to {}, refreshing", tag);
                            core.dispatch_push(PUSH_REFRESH, &json!({ "type": PUSH_REFRESH }));
                        }
                        etag = Some(tag);
                    }
                    Ok(LongPollReply::Push(message)) => core.handle_value(message),
                    Err(e) => tracing::warn!("Ignoring malformed long-poll reply: {}", e),
                }
            }
            Err(e) => {
                if core.is_finished() {
                    break;
                }
                failures += 1;
                tracing::warn!(
                    "Long-poll failed ({}/{}): {}",
                    failures,
                    options.longpoll_failure_budget,
                    e
                );
                if failures >= options.longpoll_failure_budget {
                    core.mark_lost();
                    break;
                }
                tokio::time::sleep(options.retry_delay).await;
            }
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, payload: Value, deadline: Option<Duration>) -> Result<Value> {
        let tunneled = serde_json::to_value(WsPutRequest::Tunnel {
            session: self.session.clone(),
            request: payload,
        })?;
        self.core.call(&self.sink, tunneled, deadline).await
    }

    fn on(&self, kind: &str, handler: PushHandler) {
        self.core.on(kind, handler);
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.subscribe_state()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn close(&self) {
        self.core.mark_closed();
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.abort();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
    }
}
