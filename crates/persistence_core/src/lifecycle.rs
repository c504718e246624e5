//! Coordinator lifecycle notifications.
//!
//! # Responsibility
//! - Keep an explicit registry of listeners scoped to one coordinator.
//! - Broadcast readiness and save outcomes to those listeners.
//!
//! # Invariants
//! - `DidInitialize` is emitted once per coordinator, before construction
//!   returns.
//! - Listeners run synchronously on the emitting thread, in subscription
//!   order; a listener must not block on the coordinator's main queue.

use crate::model::change_set::ChangeSummary;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of the coordinator that emitted an event.
pub type CoordinatorId = u64;

/// Observable lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Store opened and root context ready.
    DidInitialize { coordinator: CoordinatorId },
    /// Root context committed changes to the store.
    DidSave {
        coordinator: CoordinatorId,
        summary: ChangeSummary,
    },
    /// Root commit failed; `error` is the rendered failure.
    SaveFailed {
        coordinator: CoordinatorId,
        error: String,
    },
}

impl LifecycleEvent {
    pub fn coordinator(&self) -> CoordinatorId {
        match self {
            Self::DidInitialize { coordinator }
            | Self::DidSave { coordinator, .. }
            | Self::SaveFailed { coordinator, .. } => *coordinator,
        }
    }
}

/// Receiver of lifecycle events.
pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> LifecycleListener for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Listener registry owned by one coordinator.
#[derive(Default)]
pub struct LifecycleObservers {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn LifecycleListener>)>>,
}

impl LifecycleObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl LifecycleListener + 'static) -> SubscriptionId {
        self.subscribe_shared(Arc::new(listener))
    }

    pub fn subscribe_shared(&self, listener: Arc<dyn LifecycleListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Removes one listener. Returns `false` when `id` is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Delivers `event` to every listener.
    pub fn emit(&self, event: &LifecycleEvent) {
        // Snapshot so listeners may subscribe/unsubscribe while handling.
        let listeners: Vec<Arc<dyn LifecycleListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}
