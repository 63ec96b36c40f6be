//! Live probes
//!
//! A [`Probe`] is a property query pinned to an AST node. It owns a private,
//! mutable copy of its locator and keeps it aligned with the text through
//! the [`ChangeNotificationBus`]: edits adjust the locator synchronously and
//! schedule a debounced re-evaluation; server refreshes only schedule one.
//! Results are published on a `watch` channel.

pub mod bus;
pub mod culling;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::edit::Adjuster;
use crate::error::Result;
use crate::job::{JobController, JobOutcome};
use crate::locator::{adjust_property, LocatorHandle, NodeLocator, Property};
use crate::rpc::protocol::{AsyncRpcUpdateValue, EvaluatePropertyReq, ParsingRequestData, Request};

pub use bus::{ChangeEvent, ChangeListener, ChangeNotificationBus};
pub use culling::CullingTaskSubmitter;

/// Supplies the current source text at evaluation time
pub type SourceProvider = Arc<dyn Fn() -> ParsingRequestData + Send + Sync>;

/// What a probe currently shows
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeState {
    Idle,
    Loading,
    /// Progress message from a running job
    Status(String),
    Ready(Value),
    Stopped,
    Failed(String),
}

struct ProbeInner {
    id: String,
    locator: Mutex<LocatorHandle>,
    property: Mutex<Property>,
    source: SourceProvider,
    jobs: Arc<JobController>,
    state: watch::Sender<ProbeState>,
    in_flight: Mutex<Option<u64>>,
}

impl ProbeInner {
    fn apply(&self, batch: &[Adjuster]) {
        self.locator.lock().adjust_all(batch);
        let mut property = self.property.lock();
        for adjuster in batch {
            adjust_property(adjuster, &mut property);
        }
    }

    fn request(&self) -> EvaluatePropertyReq {
        let property = self.property.lock().clone();
        EvaluatePropertyReq {
            src: (self.source)(),
            locator: self.locator.lock().get().clone(),
            job_label: Some(property.name.clone()),
            property,
            capture_stdout: false,
            job: None,
            skip_result_locator: None,
        }
    }

    async fn evaluate(self: Arc<Self>) {
        let weak = Arc::downgrade(&self);
        let ticket = self
            .jobs
            .create_job(Arc::new(move |value: &AsyncRpcUpdateValue| {
                if let (Some(probe), AsyncRpcUpdateValue::Status(status)) = (weak.upgrade(), value)
                {
                    probe.state.send_replace(ProbeState::Status(status.clone()));
                }
            }));
        let id = ticket.id;

        let previous = self.in_flight.lock().replace(id);
        if let Some(previous) = previous {
            tracing::debug!("Probe {} superseding job {}", self.id, previous);
            if let Err(e) = self.jobs.stop_job(previous).await {
                tracing::debug!("Stopping job {} failed: {}", previous, e);
            }
        }

        self.state.send_replace(ProbeState::Loading);
        let outcome = match Request::EvaluateProperty(self.request()).to_payload() {
            Ok(payload) => self.jobs.run(ticket, payload).await,
            Err(e) => {
                self.jobs.discard(id);
                Err(e)
            }
        };

        {
            let mut in_flight = self.in_flight.lock();
            if *in_flight != Some(id) {
                // a newer evaluation owns the state now
                return;
            }
            *in_flight = None;
        }

        let next = match outcome {
            Ok(JobOutcome::Finished(value)) => ProbeState::Ready(value),
            Ok(JobOutcome::Stopped) => ProbeState::Stopped,
            Err(e) => {
                tracing::warn!("Probe {} evaluation failed: {}", self.id, e);
                ProbeState::Failed(e.to_string())
            }
        };
        self.state.send_replace(next);
    }
}

fn spawn_evaluation(inner: &Arc<ProbeInner>) {
    tokio::spawn(Arc::clone(inner).evaluate());
}

/// A live property query
pub struct Probe {
    inner: Arc<ProbeInner>,
    bus: Arc<ChangeNotificationBus>,
    submitter: Arc<CullingTaskSubmitter>,
}

impl Probe {
    /// Open a probe, subscribe it to `bus` and start its first evaluation.
    /// `locator` is deep-cloned, so the caller's copy never moves.
    pub fn open(
        id: impl Into<String>,
        locator: &LocatorHandle,
        property: Property,
        source: SourceProvider,
        jobs: Arc<JobController>,
        bus: Arc<ChangeNotificationBus>,
        debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ProbeState::Idle);
        let inner = Arc::new(ProbeInner {
            id: id.into(),
            locator: Mutex::new(locator.to_mutable()),
            property: Mutex::new(property),
            source,
            jobs,
            state,
            in_flight: Mutex::new(None),
        });
        let submitter = Arc::new(CullingTaskSubmitter::new(debounce));

        bus.on_change(
            inner.id.clone(),
            listener(Arc::downgrade(&inner), Arc::downgrade(&submitter)),
        );
        spawn_evaluation(&inner);

        Self {
            inner,
            bus,
            submitter,
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current (adjusted) locator
    pub fn locator(&self) -> NodeLocator {
        self.inner.locator.lock().get().clone()
    }

    pub fn property(&self) -> Property {
        self.inner.property.lock().clone()
    }

    pub fn state(&self) -> ProbeState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProbeState> {
        self.inner.state.subscribe()
    }

    pub fn in_flight_job(&self) -> Option<u64> {
        *self.inner.in_flight.lock()
    }

    /// Window edits are batched in before re-evaluating
    pub fn debounce(&self) -> Duration {
        self.submitter.window()
    }

    pub fn set_debounce(&self, window: Duration) {
        self.submitter.set_window(window);
    }

    /// Evaluate now, dropping any debounced evaluation
    pub fn refresh_now(&self) {
        self.submitter.cancel();
        spawn_evaluation(&self.inner);
    }

    /// Run a pending debounced evaluation without waiting for the window
    pub fn flush(&self) -> bool {
        self.submitter.fire_immediately()
    }

    /// Unsubscribe from the bus and stop any running evaluation
    pub async fn close(self) -> Result<()> {
        self.detach();
        let job = self.inner.in_flight.lock().take();
        if let Some(job) = job {
            self.inner.jobs.stop_job(job).await?;
        }
        Ok(())
    }

    fn detach(&self) {
        self.bus.remove(&self.inner.id);
        self.submitter.cancel();
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.detach();
    }
}

fn listener(inner: Weak<ProbeInner>, submitter: Weak<CullingTaskSubmitter>) -> ChangeListener {
    Arc::new(move |event: &ChangeEvent<'_>| {
        let (Some(probe), Some(submitter)) = (inner.upgrade(), submitter.upgrade()) else {
            return;
        };
        match event {
            ChangeEvent::Edit(batch) => probe.apply(batch),
            ChangeEvent::Refresh { reason } => {
                tracing::debug!("Probe {} refreshing: {}", probe.id, reason)
            }
        }
        let weak = Arc::downgrade(&probe);
        submitter.submit(move || {
            if let Some(probe) = weak.upgrade() {
                spawn_evaluation(&probe);
            }
        });
    })
}
