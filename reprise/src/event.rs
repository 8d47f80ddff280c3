//! Host synchronization events.
//!
//! The captured API reports asynchronous completion to the application
//! through manual-reset events. On replay the core allocates one
//! [`HostEvent`] per recorded event id and blocks on it wherever the
//! capture blocked, which is how host-observable completion order is
//! preserved (the core is single-threaded; these waits are its only
//! suspension points).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::types::HandleId;

/// A manual-reset event. Cloning yields another handle to the same event.
#[derive(Clone)]
pub struct HostEvent {
    inner: Arc<EventInner>,
}

struct EventInner {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl HostEvent {
    /// Creates an event in the unsignaled state.
    pub fn new() -> HostEvent {
        HostEvent {
            inner: Arc::new(EventInner {
                signaled: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.inner.signaled.lock();
        *signaled = true;
        self.inner.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.inner.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.signaled.lock()
    }

    /// Blocks until the event is signaled. Returns `false` if `timeout`
    /// elapsed first; `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signaled = self.inner.signaled.lock();
        match timeout {
            None => {
                while !*signaled {
                    self.inner.cond.wait(&mut signaled);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signaled {
                    if self.inner.cond.wait_until(&mut signaled, deadline).timed_out() {
                        return *signaled;
                    }
                }
                true
            }
        }
    }
}

impl Default for HostEvent {
    fn default() -> HostEvent {
        HostEvent::new()
    }
}

/// Cache of host events keyed by capture-time event id.
#[derive(Default)]
pub struct EventRegistry {
    events: HashMap<HandleId, HostEvent>,
}

impl EventRegistry {
    /// Returns the event cached for `id`, allocating an unsignaled one on
    /// first use. A cached event is reset iff `reset_if_cached` is set; a
    /// freshly allocated one is already unsignaled.
    pub fn get(&mut self, id: HandleId, reset_if_cached: bool) -> HostEvent {
        match self.events.get(&id) {
            Some(event) => {
                if reset_if_cached {
                    event.reset();
                }
                event.clone()
            }
            None => {
                let event = HostEvent::new();
                self.events.insert(id, event.clone());
                event
            }
        }
    }

    /// Drops every cached event.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
