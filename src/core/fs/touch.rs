//! Touch notifications
//!
//! A tree is "touched" by its first mutation. The owning controller listens
//! for that transition to prepare output resources lazily: it may decline
//! the transition beforehand, and learns afterwards that a rewrite of the
//! archive is pending.

use std::fmt;

/// Reason a listener declined a touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Veto {
    reason: String,
}

impl Veto {
    pub fn new(reason: impl Into<String>) -> Self {
        Veto {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Describes the tree at the moment of the transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchEvent {
    /// Number of entries in the tree
    pub entries: usize,
}

/// Observer of the pristine-to-touched transition
///
/// Listeners are invoked synchronously, in registration order.
pub trait TouchListener: Send + Sync {
    /// Called before the touch flag flips. Returning a veto aborts the
    /// triggering operation and leaves the tree unchanged.
    fn before_touch(&self, event: &TouchEvent) -> Result<(), Veto>;

    /// Called after the touch flag flipped
    fn after_touch(&self, event: &TouchEvent);
}
