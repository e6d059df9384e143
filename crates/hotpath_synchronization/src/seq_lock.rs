//! A sequence lock (seqlock) for publishing a single value from one writer to many readers.
//!
//! The writer bumps a sequence counter to an odd value before storing the value and to the next
//! even value after it.  Readers copy the value optimistically and retry whenever the two
//! surrounding counter loads disagree or show a write in progress.  Reads never block the writer,
//! and a write is a bounded number of plain stores, so this is a good fit for small, frequently
//! read, occasionally written state such as clocks or published configuration snapshots.
//!
//! The payload must implement [`bytemuck::AnyBitPattern`]: a reader's copy can race the writer's
//! store and observe a torn mix of old and new bytes, and requiring that every bit pattern is a
//! valid `T` makes the discarded copy harmless.  It also means the value storage never needs
//! `MaybeUninit`; the slot always holds some valid `T`.

use std::cell::UnsafeCell;
use std::sync::Arc;

use bytemuck::AnyBitPattern;
use crossbeam::utils::CachePadded;

use crate::sync::{compiler_fence, AtomicU64, Ordering};

// The single-writer discipline is enforced by the type system: the writer half does not implement
// Clone and its write method takes &mut self.  Readers are cheap handles and may be cloned onto as
// many threads as desired.

struct SeqLockShared<T> {
    /// Even: a stable value is published.  Odd: the writer is mid-store.
    seq: CachePadded<AtomicU64>,
    value: CachePadded<UnsafeCell<T>>,
}

unsafe impl<T: AnyBitPattern + Send> Send for SeqLockShared<T> {}
unsafe impl<T: AnyBitPattern + Send> Sync for SeqLockShared<T> {}

/// The writing half of a seqlock.  There is exactly one.
pub struct SeqLockWriter<T: AnyBitPattern> {
    shared: Arc<SeqLockShared<T>>,
}

/// A reading half of a seqlock.  Clone this to add readers.
pub struct SeqLockReader<T: AnyBitPattern> {
    shared: Arc<SeqLockShared<T>>,
}

impl<T: AnyBitPattern> Clone for SeqLockReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Create a seqlock holding `initial`, returning the unique writer and the first reader.
pub fn seq_lock<T: AnyBitPattern + Send>(initial: T) -> (SeqLockWriter<T>, SeqLockReader<T>) {
    let shared = Arc::new(SeqLockShared {
        seq: CachePadded::new(AtomicU64::new(0)),
        value: CachePadded::new(UnsafeCell::new(initial)),
    });
    (
        SeqLockWriter {
            shared: shared.clone(),
        },
        SeqLockReader { shared },
    )
}

/// Create a seqlock holding the all-zeroes value of `T`, which `AnyBitPattern` guarantees is
/// valid.
pub fn seq_lock_zeroed<T: AnyBitPattern + Send>() -> (SeqLockWriter<T>, SeqLockReader<T>) {
    seq_lock(T::zeroed())
}

impl<T: AnyBitPattern + Send> SeqLockWriter<T> {
    /// Publish a new value.
    ///
    /// Wait-free: two counter stores and one value store, no loops.  Readers that overlap this
    /// call will retry until the final counter store is visible.
    pub fn write(&mut self, value: T) {
        let shared = &*self.shared;
        let s = shared.seq.load(Ordering::Relaxed);
        shared.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        // The value store must not be hoisted above the odd store.
        compiler_fence(Ordering::AcqRel);
        unsafe { shared.value.get().write(value) };
        shared.seq.store(s.wrapping_add(2), Ordering::Release);
    }
}

impl<T: AnyBitPattern + Send> SeqLockReader<T> {
    /// Read a consistent snapshot of the value, retrying while a write is in flight.
    ///
    /// The returned value always corresponds to some complete `write` (or the initial value); a
    /// copy that overlapped a write fails the sequence check and is thrown away.  If the writer
    /// never pauses, this can retry indefinitely, yielding between attempts.
    pub fn read(&self) -> T {
        let shared = &*self.shared;
        loop {
            let s1 = shared.seq.load(Ordering::Acquire);
            // A torn copy here is a valid-but-wrong T, discarded below.
            let value = unsafe { shared.value.get().read() };
            // The copy must complete before the second counter load.
            compiler_fence(Ordering::AcqRel);
            let s2 = shared.seq.load(Ordering::Relaxed);
            if s1 == s2 && s1 & 1 == 0 {
                return value;
            }
            crate::sync::yield_now();
        }
    }
}
