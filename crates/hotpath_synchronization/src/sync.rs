#[cfg(not(loom))]
mod not_loom {
    pub use std::sync::atomic::{compiler_fence, AtomicU64, Ordering};
    pub use std::thread::yield_now;

    #[cfg(test)]
    pub use std::thread::spawn;

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        what()
    }
}

#[cfg(not(loom))]
pub(crate) use not_loom::*;

#[cfg(loom)]
mod with_loom {
    // Loom has no compiler_fence; a full fence is a sound stand-in under the model.
    pub use loom::sync::atomic::{fence as compiler_fence, AtomicU64, Ordering};
    pub use loom::thread::yield_now;

    #[cfg(test)]
    pub use loom::thread::spawn;

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        loom::model(what)
    }
}

#[cfg(loom)]
pub(crate) use with_loom::*;
