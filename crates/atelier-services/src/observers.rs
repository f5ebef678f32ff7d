//! Callback registry with handle-based removal.
//!
//! Observers are keyed by a monotonically assigned id. [`Observers::add`]
//! returns an [`ObserverHandle`]; dropping the handle (or calling
//! [`ObserverHandle::unsubscribe`]) removes the callback. Notification
//! runs over a snapshot, so callbacks may add or remove observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ObserverSet<T> {
    next_id: AtomicU64,
    callbacks: DashMap<u64, Callback<T>>,
}

/// A set of callbacks interested in values of type `T`.
pub struct Observers<T> {
    set: Arc<ObserverSet<T>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
        }
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Observers<T> {
    pub fn new() -> Self {
        Self {
            set: Arc::new(ObserverSet {
                next_id: AtomicU64::new(1),
                callbacks: DashMap::new(),
            }),
        }
    }

    /// Register a callback. It stays registered while the handle lives.
    pub fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ObserverHandle<T> {
        let id = self.set.next_id.fetch_add(1, Ordering::Relaxed);
        self.set.callbacks.insert(id, Arc::new(callback));
        ObserverHandle {
            id,
            set: Arc::downgrade(&self.set),
        }
    }

    /// Call every registered callback with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .set
            .callbacks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.set.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.callbacks.is_empty()
    }
}

/// Keeps one callback registered. Dropping it unsubscribes.
#[must_use = "dropping the handle unsubscribes the callback"]
pub struct ObserverHandle<T> {
    id: u64,
    set: Weak<ObserverSet<T>>,
}

impl<T> ObserverHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the callback now.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for ObserverHandle<T> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.callbacks.remove(&self.id);
        }
    }
}

impl<T> std::fmt::Debug for ObserverHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle").field("id", &self.id).finish()
    }
}
