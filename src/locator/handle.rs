//! Locator handles
//!
//! Locators are shared freely between probes, results and UI views. Only a
//! handle that owns a private deep copy may be adjusted; a shared handle is a
//! read-only view and silently ignores adjustment. Cloning a handle with
//! [`LocatorHandle::to_mutable`] is the only way to obtain an adjustable copy.

use std::sync::Arc;

use crate::edit::Adjuster;

use super::{adjust_locator, NodeLocator};

#[derive(Debug, Clone)]
enum Storage {
    Shared(Arc<NodeLocator>),
    Owned(NodeLocator),
}

/// Read-only or owning view of a [`NodeLocator`]
#[derive(Debug, Clone)]
pub struct LocatorHandle {
    storage: Storage,
}

impl LocatorHandle {
    /// Read-only view of a shared locator
    pub fn shared(locator: Arc<NodeLocator>) -> Self {
        Self {
            storage: Storage::Shared(locator),
        }
    }

    /// Read-only view taking ownership of `locator`
    pub fn immutable(locator: NodeLocator) -> Self {
        Self::shared(Arc::new(locator))
    }

    /// Adjustable handle owning `locator`
    pub fn mutable(locator: NodeLocator) -> Self {
        Self {
            storage: Storage::Owned(locator),
        }
    }

    /// Deep-clone into a new handle that owns its copy
    pub fn to_mutable(&self) -> Self {
        Self::mutable(self.get().clone())
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    pub fn get(&self) -> &NodeLocator {
        match &self.storage {
            Storage::Shared(loc) => loc,
            Storage::Owned(loc) => loc,
        }
    }

    /// Apply one adjuster. No-op on read-only handles.
    pub fn adjust(&mut self, adjuster: &Adjuster) {
        if let Storage::Owned(loc) = &mut self.storage {
            adjust_locator(adjuster, loc);
        }
    }

    /// Apply a batch of adjusters in order. No-op on read-only handles.
    pub fn adjust_all(&mut self, batch: &[Adjuster]) {
        for adjuster in batch {
            self.adjust(adjuster);
        }
    }

    /// Snapshot the current locator as a shared, read-only value
    pub fn snapshot(&self) -> Arc<NodeLocator> {
        match &self.storage {
            Storage::Shared(loc) => Arc::clone(loc),
            Storage::Owned(loc) => Arc::new(loc.clone()),
        }
    }
}
