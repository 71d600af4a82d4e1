use crate::boundary::materialize_locally;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type ListenerId = u64;

/// Change callback; listeners registered by a module run module code
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: ListenerId,
    owner: String,
    listener: Listener<T>,
}

/// Owner-tagged list of change listeners
///
/// Listeners are invoked on a snapshot taken under the lock, so a listener
/// may connect or disconnect others while it runs.
pub struct Notifier<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Notifier<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `owner`
    ///
    /// A module must keep its own clone of `listener` until its unload hook
    /// has run, so the last reference is always dropped on the module's side.
    pub fn connect(&self, owner: &str, listener: Listener<T>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry {
            id,
            owner: materialize_locally(&owner.to_string()),
            listener,
        });
        id
    }

    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Drop every listener registered by `owner`
    pub fn disconnect_owner(&self, owner: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.owner != owner);
        before - entries.len()
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .lock()
            .iter()
            .map(|e| Arc::clone(&e.listener))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
