//! Persistent WebSocket transport
//!
//! One duplex socket per session. A writer task drains an outbound queue
//! into the socket; a reader task hands every text frame to the shared
//! [`RpcCore`], which routes `rpc` replies to the correlator and everything
//! else to push handlers. When the socket closes the core reports whether
//! any message was ever received, which tells "never connected" apart from
//! "disconnected after working".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{Result, SyncError};

use super::correlator::EnvelopeSink;
use super::protocol::OutboundMessage;
use super::transport::{ConnectionState, PushHandler, RpcCore, RpcTransport, TransportKind};

/// Queues serialized envelopes for the writer task
struct QueueSink {
    outbound: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl EnvelopeSink for QueueSink {
    async fn deliver(&self, envelope: OutboundMessage) -> Result<()> {
        let text = serde_json::to_string(&envelope)?;
        tracing::debug!("-> {}", text);
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| SyncError::ConnectionClosed)
    }
}

/// WebSocket transport strategy
pub struct WebSocketTransport {
    core: Arc<RpcCore>,
    sink: QueueSink,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Connect to `url` and start routing into `core`
    pub async fn connect(url: &str, core: Arc<RpcCore>) -> Result<Self> {
        tracing::info!("Connecting WebSocket to {}", url);
        let (ws, _) = match connect_async(url).await {
            Ok(ok) => ok,
            Err(e) => {
                core.mark_lost();
                return Err(e.into());
            }
        };
        let (mut write, mut read) = ws.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(msg) = queue.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::warn!("WebSocket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        // before the reader exists, so a socket that drops at once ends Lost
        core.mark_connected();
        let reader = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                while let Some(frame) = read.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            tracing::debug!("<- {}", text);
                            core.handle_text(&text);
                        }
                        Ok(Message::Close(_)) => {
                            tracing::info!("Server closed the WebSocket");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("WebSocket read failed: {}", e);
                            break;
                        }
                    }
                }
                core.mark_lost();
            })
        };

        Ok(Self {
            core,
            sink: QueueSink { outbound },
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn core(&self) -> &Arc<RpcCore> {
        &self.core
    }
}

#[async_trait]
impl RpcTransport for WebSocketTransport {
    async fn call(&self, payload: Value, deadline: Option<Duration>) -> Result<Value> {
        self.core.call(&self.sink, payload, deadline).await
    }

    fn on(&self, kind: &str, handler: PushHandler) {
        self.core.on(kind, handler);
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.subscribe_state()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn close(&self) {
        self.core.mark_closed();
        let _ = self.sink.outbound.send(Message::Close(None));
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}
