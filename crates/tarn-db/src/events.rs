use bson::Document;

use crate::error::DbError;

/// Collection lifecycle events. `Pre*` events fire before the mutation is
/// applied; the terminal event fires after it has fully taken effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PreInsert,
    Insert,
    PreUpdate,
    Update,
    Delete,
    Error,
    Warning,
}

/// Payload handed to listeners.
#[derive(Debug)]
pub enum EventPayload<'a> {
    Document(&'a Document),
    Error(&'a DbError),
    Message(&'a str),
}

type Listener = Box<dyn Fn(&EventPayload<'_>) + Send + Sync>;

/// Synchronous listener registry. Listeners run in registration order on
/// the mutating thread; they observe state after the mutation (or before,
/// for `Pre*` events).
///
/// Listeners are not cloneable and not serializable: cloning a collection
/// (anonymous join targets, transaction snapshots) yields an empty
/// registry, and persistence drops listeners entirely.
#[derive(Default)]
pub struct EventRegistry {
    listeners: Vec<(EventKind, Listener)>,
}

impl EventRegistry {
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: Fn(&EventPayload<'_>) + Send + Sync + 'static,
    {
        self.listeners.push((kind, Box::new(listener)));
    }

    pub fn emit(&self, kind: EventKind, payload: &EventPayload<'_>) {
        for (k, listener) in &self.listeners {
            if *k == kind {
                listener(payload);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl Clone for EventRegistry {
    fn clone(&self) -> Self {
        EventRegistry::default()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
