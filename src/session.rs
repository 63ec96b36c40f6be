//! Client session
//!
//! Ties one connection to the analysis server together: the transport picked
//! by discovery, the job controller, the change bus and the probes hanging
//! off it. Push handlers are installed on the [`RpcCore`] before the
//! transport connects, so the `init` push sent right after the handshake is
//! never missed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::edit::{Adjuster, DiffEditBinding, EditTransaction, RangeChange, RangeEditBinding};
use crate::error::{Result, SyncError};
use crate::job::{JobController, WorkerSubscription};
use crate::locator::{LocatorHandle, Property};
use crate::probe::{ChangeNotificationBus, Probe, SourceProvider};
use crate::rpc::discovery;
use crate::rpc::protocol::{InitInfo, Request, PUSH_INIT, PUSH_REFRESH};
use crate::rpc::transport::{self, ConnectionState, PushHandler, RpcCore, RpcTransport};

/// One live connection plus everything that depends on it
pub struct ClientSession {
    config: ClientConfig,
    transport: Arc<dyn RpcTransport>,
    jobs: Arc<JobController>,
    bus: Arc<ChangeNotificationBus>,
    init: watch::Receiver<Option<InitInfo>>,
    next_probe: AtomicU64,
    range_binding: RangeEditBinding,
    diff_binding: DiffEditBinding,
}

impl ClientSession {
    /// Discover the transport for `config.server.url`, connect, and wait
    /// (up to the RPC timeout) for the server's `init` push
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let core = Arc::new(RpcCore::new(config.rpc_timeout()));
        let bus = Arc::new(ChangeNotificationBus::new());
        let init = install_handlers(|kind, handler| core.on(kind, handler), &bus);

        let transport = discovery::connect(&config, Arc::clone(&core)).await?;
        tracing::info!("Session connected over {}", transport.kind());
        let session = Self::assemble(config, transport, bus, init);

        // probes opened from here on debounce with the server's interval
        let deadline = session.config.rpc_timeout();
        match tokio::time::timeout(deadline, session.wait_for_init()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("No init push from server: {}", e),
            Err(_) => tracing::warn!(
                "No init push within {:?}, debouncing with the configured {:?}",
                deadline,
                session.config.change_buffer()
            ),
        }
        Ok(session)
    }

    /// Build a session on an already-open transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn RpcTransport>) -> Self {
        let bus = Arc::new(ChangeNotificationBus::new());
        let init = install_handlers(|kind, handler| transport.on(kind, handler), &bus);
        Self::assemble(config, transport, bus, init)
    }

    fn assemble(
        config: ClientConfig,
        transport: Arc<dyn RpcTransport>,
        bus: Arc<ChangeNotificationBus>,
        init: watch::Receiver<Option<InitInfo>>,
    ) -> Self {
        let jobs = Arc::new(JobController::new(Arc::clone(&transport)));
        Self {
            config,
            transport,
            jobs,
            bus,
            init,
            next_probe: AtomicU64::new(1),
            range_binding: RangeEditBinding::new(),
            diff_binding: DiffEditBinding::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub fn jobs(&self) -> &Arc<JobController> {
        &self.jobs
    }

    pub fn bus(&self) -> &Arc<ChangeNotificationBus> {
        &self.bus
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.connection_state()
    }

    /// Server capabilities from the `init` push, once it has arrived
    pub fn init_info(&self) -> Option<InitInfo> {
        self.init.borrow().clone()
    }

    /// Wait until the `init` push has arrived
    pub async fn wait_for_init(&self) -> Result<InitInfo> {
        let mut init = self.init.clone();
        loop {
            if let Some(info) = init.borrow_and_update().clone() {
                return Ok(info);
            }
            if init.changed().await.is_err() {
                return Err(SyncError::ConnectionClosed);
            }
        }
    }

    /// Debounce window for probe re-evaluation: the server's announced
    /// batching interval, or the configured default
    pub fn change_buffer(&self) -> Duration {
        self.init_info()
            .and_then(|info| info.change_buffer_time)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.change_buffer())
    }

    /// Broadcast one edit's adjusters to every probe
    pub fn apply_edit(&self, batch: &[Adjuster]) {
        self.bus.notify_edit(batch);
    }

    /// Broadcast an editor change event given as ranges plus replacement text
    pub fn apply_range_changes(&self, changes: &[RangeChange]) {
        self.apply_edit(&self.range_binding.adjusters(changes));
    }

    /// Broadcast an editor change event given as transactions
    pub fn apply_transactions(&self, transactions: &[EditTransaction]) {
        self.apply_edit(&self.diff_binding.adjusters(transactions));
    }

    /// Open a probe evaluating `property` on the node `locator` points at
    pub fn open_probe(
        &self,
        locator: &LocatorHandle,
        property: Property,
        source: SourceProvider,
    ) -> Probe {
        let id = format!("probe-{}", self.next_probe.fetch_add(1, Ordering::SeqCst));
        tracing::debug!("Opening {} for property '{}'", id, property.name);
        Probe::open(
            id,
            locator,
            property,
            source,
            Arc::clone(&self.jobs),
            Arc::clone(&self.bus),
            self.change_buffer(),
        )
    }

    /// Send a raw request payload
    pub async fn call(&self, payload: Value) -> Result<Value> {
        self.transport.call(payload, None).await
    }

    /// Send a typed request and decode its reply
    pub async fn request<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
        transport::request(self.transport.as_ref(), request).await
    }

    pub async fn subscribe_worker_status<F>(&self, on_statuses: F) -> Result<WorkerSubscription>
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.jobs.subscribe_worker_status(on_statuses).await
    }

    pub async fn unsubscribe_worker_status(&self, subscription: WorkerSubscription) -> Result<()> {
        self.jobs.unsubscribe_worker_status(subscription).await
    }

    pub async fn close(&self) {
        tracing::info!("Closing session");
        self.transport.close().await;
    }
}

/// Route `init` into a watch channel and `refresh` onto the bus
fn install_handlers(
    on: impl Fn(&str, PushHandler),
    bus: &Arc<ChangeNotificationBus>,
) -> watch::Receiver<Option<InitInfo>> {
    let (init_tx, init_rx) = watch::channel(None);
    on(
        PUSH_INIT,
        Arc::new(move |body: &Value| match serde_json::from_value::<InitInfo>(body.clone()) {
            Ok(info) => {
                tracing::info!(
                    "Server init: changeBufferTime={:?} workers={:?}",
                    info.change_buffer_time,
                    info.worker_process_count
                );
                init_tx.send_replace(Some(info));
            }
            Err(e) => tracing::warn!("Malformed init push: {}", e),
        }),
    );

    let bus = Arc::clone(bus);
    on(
        PUSH_REFRESH,
        Arc::new(move |_: &Value| bus.notify_refresh(PUSH_REFRESH)),
    );
    init_rx
}
