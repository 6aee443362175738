//! Handler table owned by one event bus, and the subscription handles that
//! remove entries from it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::error::HandlerError;
use super::event::Event;

/// A subscriber callback. Runs on the bus consume thread.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

struct Registered {
    id: u64,
    handler: Handler,
}

/// Event type → handlers, in registration order.
#[derive(Default)]
pub(crate) struct HandlerTable {
    entries: RwLock<HashMap<String, Vec<Registered>>>,
    next_id: AtomicU64,
}

impl HandlerTable {
    pub(crate) fn insert(self: &Arc<Self>, event_type: &str, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type.to_string())
            .or_default()
            .push(Registered { id, handler });

        Subscription {
            event_type: event_type.to_string(),
            id,
            table: Arc::downgrade(self),
        }
    }

    /// Returns whether a handler was removed.
    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let Some(handlers) = entries.get_mut(event_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            entries.remove(event_type);
        }
        removed
    }

    /// Snapshot of the handlers for one type. The lock is not held while
    /// handlers run.
    pub(crate) fn handlers_for(&self, event_type: &str) -> Vec<Handler> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
            .map(|handlers| handlers.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default()
    }

    /// Event types with at least one handler, sorted.
    pub(crate) fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    #[cfg(test)]
    fn handler_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }
}

/// Handle for one registered handler.
///
/// Dropping the handle does *not* unsubscribe; call [`Subscription::unsubscribe`].
/// Unsubscribing stops future invocations only: a delivery already running
/// on the consume thread completes.
#[derive(Debug, Clone)]
pub struct Subscription {
    event_type: String,
    id: u64,
    table: Weak<HandlerTable>,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Remove the handler. Returns `false` if it was already removed or the
    /// bus is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => table.remove(&self.event_type, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("event_types", &self.event_types())
            .finish()
    }
}
