//! Debounced task submission
//!
//! A burst of edits should cause one re-evaluation, not one per keystroke.
//! [`CullingTaskSubmitter`] holds at most one unfired task: each `submit`
//! replaces the previous task and restarts the window, so only the last task
//! of a burst runs, once the window elapses without another submission.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

type Task = Box<dyn FnOnce() + Send>;

struct State {
    window: Duration,
    pending: Option<Task>,
    /// Bumped on every submit/cancel so a stale timer never fires a newer task
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl State {
    fn clear(&mut self) -> Option<Task> {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.pending.take()
    }
}

/// Debouncer holding at most one pending task. Must be used inside a tokio
/// runtime.
pub struct CullingTaskSubmitter {
    state: Arc<Mutex<State>>,
}

impl CullingTaskSubmitter {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                window,
                pending: None,
                generation: 0,
                timer: None,
            })),
        }
    }

    pub fn window(&self) -> Duration {
        self.state.lock().window
    }

    /// Change the window used by later submissions
    pub fn set_window(&self, window: Duration) {
        self.state.lock().window = window;
    }

    /// Replace any unfired task with `task` and restart the window
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.clear().is_some() {
            tracing::trace!("Culled superseded task");
        }
        state.pending = Some(Box::new(task));
        let generation = state.generation;
        let window = state.window;

        let shared = Arc::clone(&self.state);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let task = {
                let mut state = shared.lock();
                if state.generation != generation {
                    return;
                }
                state.timer = None;
                state.pending.take()
            };
            if let Some(task) = task {
                task();
            }
        }));
    }

    /// Discard the pending task, if any
    pub fn cancel(&self) {
        self.state.lock().clear();
    }

    /// Run the pending task now, on the calling thread. Returns false when
    /// nothing was pending.
    pub fn fire_immediately(&self) -> bool {
        let task = self.state.lock().clear();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}

impl Drop for CullingTaskSubmitter {
    fn drop(&mut self) {
        self.state.lock().clear();
    }
}
