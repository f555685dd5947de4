//! Mutual exclusion for render passes.

use std::sync::atomic::{AtomicBool, Ordering};

/// Single-holder gate guarding the pass scheduling section.
///
/// Acquisition never blocks and never queues. A caller that loses the race
/// walks away; the UI keeps painting whatever tiles already exist and a later
/// event triggers the next attempt.
#[derive(Debug, Default)]
pub struct PassGate {
    locked: AtomicBool,
}

impl PassGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the gate. Returns `None` when another pass holds it.
    pub fn try_acquire(&self) -> Option<PassGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
            .then_some(PassGuard { gate: self })
    }

    /// True while a pass holds the gate.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Releases the gate on drop.
#[derive(Debug)]
pub struct PassGuard<'a> {
    gate: &'a PassGate,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.gate.locked.store(false, Ordering::Release);
    }
}
