//! Job controller
//!
//! Long-running evaluations run as server-side jobs. The client picks the
//! job id and sends it with the request; the server either answers inline
//! (`sync`) or acknowledges with `job` and streams `asyncUpdate` pushes for
//! that id: zero or more non-final updates, then exactly one final update.
//!
//! The job table is owned by the controller, one per session. Whoever
//! removes an entry first settles it: the final push, a successful stop, or
//! the inline `sync` reply. Everything that arrives afterwards for the same
//! id is logged and ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch};

use crate::error::{Result, SyncError};
use crate::rpc::protocol::{
    AsyncRpcUpdate, AsyncRpcUpdateValue, EvaluatePropertyReq, EvaluatePropertyRes,
    PropertyEvaluation, Request, TaskDone, PUSH_ASYNC_UPDATE,
};
use crate::rpc::transport::{ConnectionState, RpcTransport};

/// Receives every update pushed for one job
pub type UpdateHandler = Arc<dyn Fn(&AsyncRpcUpdateValue) + Send + Sync>;

/// How a job entry was settled
#[derive(Debug, Clone, PartialEq)]
pub enum JobCompletion {
    /// The final update arrived
    Done(AsyncRpcUpdateValue),
    /// The job was stopped before it finished
    Stopped,
}

/// Result of driving an evaluation to the end
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished(Value),
    Stopped,
}

impl JobOutcome {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Finished(value) => Some(value),
            Self::Stopped => None,
        }
    }
}

/// A registered job id and the receiver for its completion
#[derive(Debug)]
pub struct JobTicket {
    pub id: u64,
    completion: oneshot::Receiver<JobCompletion>,
}

/// Handle for an active worker-status subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSubscription {
    pub job: u64,
    pub subscriber_id: u64,
}

struct JobEntry {
    handler: UpdateHandler,
    completion: Option<oneshot::Sender<JobCompletion>>,
}

#[derive(Default)]
struct JobTable {
    entries: Mutex<HashMap<u64, JobEntry>>,
}

impl JobTable {
    fn handle_update(&self, update: AsyncRpcUpdate) {
        if !update.is_final_update {
            let handler = self
                .entries
                .lock()
                .get(&update.job)
                .map(|entry| Arc::clone(&entry.handler));
            match handler {
                Some(handler) => handler(&update.value),
                None => tracing::debug!("Ignoring update for unknown job {}", update.job),
            }
            return;
        }

        let Some(entry) = self.entries.lock().remove(&update.job) else {
            tracing::debug!("Ignoring final update for settled job {}", update.job);
            return;
        };
        (entry.handler)(&update.value);
        if let Some(tx) = entry.completion {
            let _ = tx.send(JobCompletion::Done(update.value));
        }
    }

    fn settle(&self, id: u64, completion: JobCompletion) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            return false;
        };
        if let Some(tx) = entry.completion {
            let _ = tx.send(completion);
        }
        true
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeReply {
    subscriber_id: u64,
}

/// Creates jobs, routes their updates and cancels them
pub struct JobController {
    transport: Arc<dyn RpcTransport>,
    next_job: AtomicU64,
    table: Arc<JobTable>,
}

impl JobController {
    /// Create a controller and register its `asyncUpdate` handler on
    /// `transport`
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        let table = Arc::new(JobTable::default());
        {
            let table = Arc::clone(&table);
            transport.on(
                PUSH_ASYNC_UPDATE,
                Arc::new(move |body: &Value| {
                    match serde_json::from_value::<AsyncRpcUpdate>(body.clone()) {
                        Ok(update) => table.handle_update(update),
                        Err(e) => tracing::warn!("Dropping malformed job update: {}", e),
                    }
                }),
            );
        }
        Self {
            transport,
            next_job: AtomicU64::new(1),
            table,
        }
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    /// Allocate a job id and install `handler` for its updates
    pub fn create_job(&self, handler: UpdateHandler) -> JobTicket {
        let id = self.next_job.fetch_add(1, Ordering::SeqCst);
        let (tx, completion) = oneshot::channel();
        self.table.entries.lock().insert(
            id,
            JobEntry {
                handler,
                completion: Some(tx),
            },
        );
        JobTicket { id, completion }
    }

    /// Drop the handler for `id` without settling anyone
    pub fn discard(&self, id: u64) {
        self.table.entries.lock().remove(&id);
    }

    pub fn is_active(&self, id: u64) -> bool {
        self.table.entries.lock().contains_key(&id)
    }

    pub fn active_jobs(&self) -> usize {
        self.table.entries.lock().len()
    }

    /// Route an update as if it had been pushed by the server
    pub fn handle_update(&self, update: AsyncRpcUpdate) {
        self.table.handle_update(update);
    }

    /// Send `payload` tagged with the ticket's job id and wait until the
    /// evaluation finishes, is stopped, or the connection goes away
    pub async fn run(&self, ticket: JobTicket, mut payload: Value) -> Result<JobOutcome> {
        let JobTicket { id, completion } = ticket;
        let Some(fields) = payload.as_object_mut() else {
            self.discard(id);
            return Err(SyncError::protocol("job payload must be a JSON object"));
        };
        fields.insert("job".to_string(), json!(id));

        let reply = match self.transport.call(payload, None).await {
            Ok(reply) => reply,
            Err(e) => {
                self.discard(id);
                return Err(e);
            }
        };
        let evaluation = match serde_json::from_value::<EvaluatePropertyRes>(reply) {
            Ok(res) => res.response,
            Err(e) => {
                self.discard(id);
                return Err(e.into());
            }
        };

        match evaluation {
            PropertyEvaluation::Sync { value } => {
                self.discard(id);
                Ok(JobOutcome::Finished(value))
            }
            PropertyEvaluation::Job { .. } => {
                tracing::debug!("Evaluation continues as job {}", id);
                let mut state = self.transport.connection_state();
                tokio::select! {
                    settled = completion => match settled {
                        Ok(JobCompletion::Done(value)) => finish(id, value),
                        Ok(JobCompletion::Stopped) => Ok(JobOutcome::Stopped),
                        Err(_) => Err(SyncError::ConnectionClosed),
                    },
                    err = connection_ended(&mut state) => {
                        self.discard(id);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Run `payload` as a job, passing every update to `on_update`
    pub async fn evaluate<F>(&self, payload: Value, on_update: F) -> Result<JobOutcome>
    where
        F: Fn(&AsyncRpcUpdateValue) + Send + Sync + 'static,
    {
        let ticket = self.create_job(Arc::new(on_update));
        self.run(ticket, payload).await
    }

    /// Evaluate a property on a located node
    pub async fn evaluate_property<F>(
        &self,
        request: EvaluatePropertyReq,
        on_update: F,
    ) -> Result<JobOutcome>
    where
        F: Fn(&AsyncRpcUpdateValue) + Send + Sync + 'static,
    {
        let payload = Request::EvaluateProperty(request).to_payload()?;
        self.evaluate(payload, on_update).await
    }

    /// Ask the server to stop job `id`. On success the caller waiting on the
    /// job sees [`JobOutcome::Stopped`], unless the job already finished.
    ///
    /// A failed stop for a job that has meanwhile finished is not an error:
    /// either way the job is no longer running.
    pub async fn stop_job(&self, id: u64) -> Result<()> {
        let payload = Request::StopJob { job: id }.to_payload()?;
        if let Err(e) = self.transport.call(payload, None).await {
            if self.is_active(id) {
                return Err(e);
            }
            tracing::debug!("Stop of finished job {} failed: {}", id, e);
            return Ok(());
        }
        if self.table.settle(id, JobCompletion::Stopped) {
            tracing::debug!("Stopped job {}", id);
        } else {
            tracing::debug!("Job {} had already finished when stop completed", id);
        }
        Ok(())
    }

    /// Receive `workerStatuses` updates until unsubscribed
    pub async fn subscribe_worker_status<F>(&self, on_statuses: F) -> Result<WorkerSubscription>
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        let ticket = self.create_job(Arc::new(move |value: &AsyncRpcUpdateValue| {
            if let AsyncRpcUpdateValue::WorkerStatuses(statuses) = value {
                on_statuses(statuses);
            }
        }));
        let job = ticket.id;
        let payload = Request::SubscribeToWorkerStatus { job }.to_payload()?;
        let reply = match self.transport.call(payload, None).await {
            Ok(reply) => reply,
            Err(e) => {
                self.discard(job);
                return Err(e);
            }
        };
        match serde_json::from_value::<SubscribeReply>(reply) {
            Ok(reply) => Ok(WorkerSubscription {
                job,
                subscriber_id: reply.subscriber_id,
            }),
            Err(e) => {
                self.discard(job);
                Err(e.into())
            }
        }
    }

    pub async fn unsubscribe_worker_status(&self, subscription: WorkerSubscription) -> Result<()> {
        self.discard(subscription.job);
        let payload = Request::UnsubscribeFromWorkerStatus {
            job: subscription.job,
            subscriber_id: subscription.subscriber_id,
        }
        .to_payload()?;
        self.transport.call(payload, None).await?;
        Ok(())
    }
}

fn finish(id: u64, value: AsyncRpcUpdateValue) -> Result<JobOutcome> {
    match value {
        AsyncRpcUpdateValue::WorkerTaskDone(TaskDone::Normal(result)) => {
            Ok(JobOutcome::Finished(unwrap_sync(result)))
        }
        AsyncRpcUpdateValue::WorkerTaskDone(TaskDone::UnexpectedError(lines)) => {
            Err(SyncError::JobFailed { job: id, lines })
        }
        other => Err(SyncError::protocol(format!(
            "job {} ended with {:?} instead of workerTaskDone",
            id, other
        ))),
    }
}

/// A finished job carries the same `{response: {type: sync, value}}` shape
/// an inline reply would; hand back just the value when it does.
fn unwrap_sync(result: Value) -> Value {
    match serde_json::from_value::<EvaluatePropertyRes>(result.clone()) {
        Ok(EvaluatePropertyRes {
            response: PropertyEvaluation::Sync { value },
        }) => value,
        _ => result,
    }
}

async fn connection_ended(state: &mut watch::Receiver<ConnectionState>) -> SyncError {
    loop {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Lost { ever_received } => {
                return SyncError::ConnectionLost { ever_received }
            }
            ConnectionState::Closed => return SyncError::ConnectionClosed,
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }
        if state.changed().await.is_err() {
            return SyncError::ConnectionClosed;
        }
    }
}
