//! Request correlation
//!
//! Assigns request ids, keeps the table of calls awaiting a reply and
//! enforces per-call deadlines. Replies are matched by id, so they may
//! arrive in any order. A reply for an id that is no longer pending (timed
//! out, duplicated, or never sent) is logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{Result, SyncError};

use super::protocol::{OutboundMessage, RpcReply};

/// Default deadline for a call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where outgoing envelopes go
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    async fn deliver(&self, envelope: OutboundMessage) -> Result<()>;
}

/// A registered call waiting for its reply
#[derive(Debug)]
pub struct PendingCall {
    pub id: u64,
    rx: oneshot::Receiver<Result<Value>>,
}

/// Id allocation and pending-call table for one session
#[derive(Debug)]
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    default_timeout: Duration,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl RequestCorrelator {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Allocate a fresh id and register it as pending
    pub fn register(&self) -> PendingCall {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        PendingCall { id, rx }
    }

    /// Settle a pending call with a server reply. Returns false if nobody
    /// was waiting for `id`.
    pub fn resolve(&self, id: u64, reply: RpcReply) -> bool {
        self.settle(id, reply.into_result())
    }

    /// Settle a pending call with an error
    pub fn reject(&self, id: u64, err: SyncError) -> bool {
        self.settle(id, Err(err))
    }

    fn settle(&self, id: u64, result: Result<Value>) -> bool {
        let Some(tx) = self.pending.lock().remove(&id) else {
            tracing::warn!("Dropping reply for unknown or settled request {}", id);
            return false;
        };
        if tx.send(result).is_err() {
            tracing::debug!("Caller of request {} went away before the reply", id);
        }
        true
    }

    /// Forget a pending call without settling it
    pub fn forget(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Reject every pending call, as on disconnect
    pub fn drain(&self, make_err: impl Fn() -> SyncError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::info!("Rejecting {} pending requests", drained.len());
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(make_err()));
        }
    }

    /// Send `payload` through `sink` and wait for the matching reply.
    ///
    /// The deadline covers delivery as well as the reply. On timeout the
    /// pending entry is removed, so a late reply becomes a no-op.
    pub async fn call(
        &self,
        sink: &dyn EnvelopeSink,
        payload: Value,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        let call = self.register();
        let id = call.id;
        let envelope = OutboundMessage::Rpc { id, data: payload };
        self.wait_with(call, deadline, sink.deliver(envelope)).await
    }

    /// Wait for `call` to settle after `delivery` completes, within `deadline`
    pub async fn wait_with<F>(
        &self,
        call: PendingCall,
        deadline: Option<Duration>,
        delivery: F,
    ) -> Result<Value>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let PendingCall { id, rx } = call;
        let limit = deadline.unwrap_or(self.default_timeout);

        let outcome = timeout(limit, async {
            delivery.await?;
            rx.await.map_err(|_| SyncError::ConnectionClosed)?
        })
        .await;

        match outcome {
            Ok(result) => {
                if result.is_err() {
                    self.forget(id);
                }
                result
            }
            Err(_) => {
                self.forget(id);
                tracing::debug!("Request {} timed out after {:?}", id, limit);
                Err(SyncError::Timeout { id, elapsed: limit })
            }
        }
    }
}
