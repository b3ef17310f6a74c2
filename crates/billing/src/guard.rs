//! Re-entrancy guard for reconciliation passes
//!
//! The engine persists the new customer id before it attaches a plan. Any
//! persistence layer that reconciles on save would otherwise start a second
//! pass from inside the first one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag carried by a subscription record for the duration of one pass.
///
/// The flag belongs to one record: a clone starts disengaged, so a pass on
/// a copy of the record is never suppressed by the original's pass.
#[derive(Debug, Default)]
pub struct RecursionGuard {
    engaged: Arc<AtomicBool>,
}

impl Clone for RecursionGuard {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// Set the flag until the returned scope is dropped
    #[must_use = "the guard is released as soon as the scope is dropped"]
    pub fn engage(&self) -> GuardScope {
        self.engaged.store(true, Ordering::SeqCst);
        GuardScope {
            engaged: Arc::clone(&self.engaged),
        }
    }
}

/// Clears the guard flag on drop
#[derive(Debug)]
pub struct GuardScope {
    engaged: Arc<AtomicBool>,
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        self.engaged.store(false, Ordering::SeqCst);
    }
}
