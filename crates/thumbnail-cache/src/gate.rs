//! Admission control for thumbnail extraction
//!
//! Each generation spawns an external process, so only a fixed number may
//! run at once, and a folder that is already being processed is never
//! admitted a second time. Refusal is not an error: the caller skips this
//! round and a later visibility event retries.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

struct GateState {
    active: usize,
    in_flight: HashSet<String>,
}

struct GateInner {
    capacity: usize,
    state: Mutex<GateState>,
}

/// Bounded, per-folder de-duplicating admission gate.
#[derive(Clone)]
pub struct GenerationGate {
    inner: Arc<GateInner>,
}

impl GenerationGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                capacity: capacity.max(1),
                state: Mutex::new(GateState {
                    active: 0,
                    in_flight: HashSet::new(),
                }),
            }),
        }
    }

    /// Try to admit a generation for `folder_path`.
    ///
    /// The ceiling check, the in-flight check and the marking all happen
    /// under one lock, so two racing requests for the same folder cannot
    /// both get in.
    pub fn admit(&self, folder_path: &str) -> Option<Permit> {
        let mut state = self.inner.state.lock();
        if state.in_flight.contains(folder_path) {
            log::debug!("Refusing {}: already in flight", folder_path);
            return None;
        }
        if state.active >= self.inner.capacity {
            log::debug!(
                "Refusing {}: {} of {} slots busy",
                folder_path,
                state.active,
                self.inner.capacity
            );
            return None;
        }

        state.active += 1;
        state.in_flight.insert(folder_path.to_string());
        Some(Permit {
            gate: self.inner.clone(),
            folder_path: folder_path.to_string(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of admitted generations not yet released.
    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn is_in_flight(&self, folder_path: &str) -> bool {
        self.inner.state.lock().in_flight.contains(folder_path)
    }
}

impl fmt::Debug for GenerationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GenerationGate")
            .field("capacity", &self.inner.capacity)
            .field("active", &state.active)
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

/// An admitted generation slot. Released when dropped, on every exit path
/// including errors, timeouts and task cancellation.
pub struct Permit {
    gate: Arc<GateInner>,
    folder_path: String,
}

impl Permit {
    pub fn folder_path(&self) -> &str {
        &self.folder_path
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("folder_path", &self.folder_path)
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.active = state.active.saturating_sub(1);
        state.in_flight.remove(&self.folder_path);
    }
}
