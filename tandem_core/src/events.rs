//! Typed execution events and the listener registry.
//!
//! Both the store (full-state snapshots) and the scheduler (typed
//! [`ExecutionEvent`]s) broadcast through a [`ListenerSet`]. Delivery is
//! synchronous, happens outside any state lock, and isolates panicking
//! callbacks so one bad listener cannot starve the rest or poison a mutex.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Kinds of events emitted by the execution scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A run was kicked off
    Started,
    /// Execution was suspended
    Paused,
    /// Execution resumed after a pause
    Resumed,
    /// Execution reached a terminal state
    Stopped,
    /// A tick or setup failure was recorded
    Error,
    /// Overall progress changed
    Progress,
    /// An agent was credited with an objective
    ObjectiveCompleted,
    /// The derived phase index changed
    PhaseChanged,
}

/// A single event broadcast to scheduler listeners.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEvent {
    /// Event kind
    pub kind: EventKind,

    /// Context time at emission
    pub timestamp: Duration,

    /// Structured payload (shape depends on `kind`)
    pub payload: Value,

    /// Human-readable summary
    pub message: String,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind, timestamp: Duration, payload: Value, message: &str) -> Self {
        Self {
            kind,
            timestamp,
            payload,
            message: message.to_string(),
        }
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback registry with at most one callback per listener id.
///
/// Registering under an existing id replaces the previous callback, so a
/// reconnecting consumer never accumulates duplicate subscriptions.
pub struct ListenerSet<T> {
    listeners: Mutex<HashMap<String, Callback<T>>>,
}

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a callback, replacing any previous one under the same id.
    pub fn register(&self, id: &str, callback: impl Fn(&T) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(callback));
    }

    /// Removes a callback. Returns false if the id was unknown.
    pub fn remove(&self, id: &str) -> bool {
        self.listeners.lock().unwrap().remove(id).is_some()
    }

    /// Drops all callbacks.
    pub fn clear(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().unwrap().is_empty()
    }

    /// Delivers `value` to every registered callback.
    ///
    /// The registry lock is released before any callback runs, so callbacks
    /// may re-enter the set (register, remove). A panicking callback is
    /// caught and logged; remaining callbacks still run.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(String, Callback<T>)> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(id, cb)| (id.clone(), Arc::clone(cb)))
            .collect();

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!(listener = %id, "listener panicked during delivery");
            }
        }
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
