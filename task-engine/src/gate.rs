//! Resizable counting gate for worker concurrency

use std::sync::{Arc, Mutex, PoisonError};

/// Bounds the number of in-flight task handlers.
///
/// Unlike a plain semaphore, capacity is mutable at runtime: raising it frees
/// slots immediately, lowering it only takes effect on subsequent acquires.
/// Permit holders are never interrupted. Acquisition never blocks.
#[derive(Debug, Clone)]
pub struct WorkerGate {
    state: Arc<Mutex<GateState>>,
}

#[derive(Debug)]
struct GateState {
    capacity: usize,
    in_flight: usize,
}

impl WorkerGate {
    /// Capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                capacity: capacity.max(1),
                in_flight: 0,
            })),
        }
    }

    pub fn try_acquire(&self) -> Option<GatePermit> {
        let mut state = self.lock();
        if state.in_flight >= state.capacity {
            return None;
        }
        state.in_flight += 1;
        Some(GatePermit {
            state: Arc::clone(&self.state),
        })
    }

    /// Values below 1 clamp to 1.
    pub fn set_capacity(&self, capacity: usize) {
        self.lock().capacity = capacity.max(1);
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its slot on drop.
#[derive(Debug)]
pub struct GatePermit {
    state: Arc<Mutex<GateState>>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}
