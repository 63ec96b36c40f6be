//! Change notification bus
//!
//! Every open probe registers a listener under its own id. Local edits fan
//! out as an adjuster batch; server-side refreshes fan out as a reason tag.
//! Listeners run synchronously on the notifying thread, in id order, so an
//! edit has reached every locator before `notify_edit` returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::edit::Adjuster;

/// Something that invalidates probe state
#[derive(Debug, Clone, Copy)]
pub enum ChangeEvent<'a> {
    /// Local edit; adjust locators with the batch, in order
    Edit(&'a [Adjuster]),
    /// The server's view changed; locators stay, results are stale
    Refresh { reason: &'a str },
}

pub type ChangeListener = Arc<dyn Fn(&ChangeEvent<'_>) + Send + Sync>;

/// Fan-out of edit and refresh notifications to probes
#[derive(Default)]
pub struct ChangeNotificationBus {
    listeners: Mutex<BTreeMap<String, ChangeListener>>,
}

impl ChangeNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `id`, replacing any previous one
    pub fn on_change(&self, id: impl Into<String>, listener: ChangeListener) {
        let id = id.into();
        if self.listeners.lock().insert(id.clone(), listener).is_some() {
            tracing::debug!("Replaced change listener '{}'", id);
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.listeners.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn notify_edit(&self, batch: &[Adjuster]) {
        if batch.is_empty() {
            return;
        }
        self.notify(&ChangeEvent::Edit(batch));
    }

    pub fn notify_refresh(&self, reason: &str) {
        self.notify(&ChangeEvent::Refresh { reason });
    }

    fn notify(&self, event: &ChangeEvent<'_>) {
        // Listeners may (un)register while being notified
        let listeners: Vec<ChangeListener> = self.listeners.lock().values().cloned().collect();
        tracing::trace!("Notifying {} listeners of {:?}", listeners.len(), event);
        for listener in listeners {
            listener(event);
        }
    }
}
