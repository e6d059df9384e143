//! Errors shared by the queue types.

use std::fmt;

/// Returned when constructing a queue with an unusable capacity.
///
/// Both queues index their rings by masking with `capacity - 1`, so the capacity must be a power
/// of two, and a zero-capacity queue could never accept an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue capacity {0} must be a nonzero power of two")]
pub struct InvalidCapacity(pub usize);

/// Returned by `push` when the queue is full.
///
/// Carries the rejected value back to the caller so that move-only payloads are not lost.  A full
/// queue is a normal outcome, not a fault; callers that want to block simply retry.
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Consume the error and recover the value that did not fit.
    pub fn into_inner(self) -> T {
        self.0
    }
}

// Manual impls so that T does not need to be Debug.
impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for Full<T> {}
