//! System-level operations.

use std::time::Duration;

/// System operations trait.
pub trait SystemOps {
    /// Block the current thread, e.g. between udev polls.
    fn sleep(&self, duration: Duration);
}
