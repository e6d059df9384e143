//! A bounded SPSC queue with in-place access to the front element.
//!
//! One thread pushes, one thread pops, and both sides are wait-free: a push or pop is a handful
//! of loads, one slot write or drop, and one release store, with no loops.  Full and empty are
//! reported to the caller rather than waited out, so the queue itself never spins.
//!
//! The consumer gets at elements through [`SpscConsumer::front`], which borrows the element in
//! place; [`SpscConsumer::pop`] then drops it and frees the slot.  This split lets consumers
//! inspect or partially move out of large payloads without copying them to the stack first.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::error::{Full, InvalidCapacity};
use crate::sync::{AtomicU64, Ordering};

// The implementation works as follows:
//
// - head is the next position to pop and is advanced only by the consumer; tail is the next
//   position to push and is advanced only by the producer.  Both grow without wrapping, so
//   `tail - head` is always the number of elements in the queue, and position p lives in slot
//   `p & (capacity - 1)`.
// - Each half keeps a private cache of the other side's counter and refreshes it only when the
//   queue looks full (producer) or empty (consumer).  In the common case a push or pop touches
//   one shared counter instead of two.
// - The counters sit on their own cache lines; the caches are private fields of their owning
//   half, so they never generate coherence traffic at all.
// - Slots are uninitialized storage.  A slot holds a live element exactly when some position in
//   `[head, tail)` maps to it, which is what makes the drain in Drop correct.
// - The single-producer single-consumer discipline is enforced by the type system: the halves
//   don't implement Clone, and every operation takes &mut self.

struct SpscRing<T> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    mask: u64,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    fn capacity(&self) -> u64 {
        self.mask + 1
    }

    fn slot(&self, pos: u64) -> *mut MaybeUninit<T> {
        self.slots[(pos & self.mask) as usize].get()
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Both halves are gone, so the counters are quiescent; everything in [head, tail) is
        // still live and is dropped exactly once here.
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        while head != tail {
            unsafe { (*self.slot(head)).assume_init_drop() };
            head += 1;
        }
    }
}

/// The producing half of a bounded SPSC queue.
pub struct SpscProducer<T> {
    ring: Arc<SpscRing<T>>,
    cached_head: u64,
}

/// The consuming half of a bounded SPSC queue.
pub struct SpscConsumer<T> {
    ring: Arc<SpscRing<T>>,
    cached_tail: u64,
}

/// Create a bounded SPSC queue with room for `capacity` elements.
///
/// The capacity must be a nonzero power of two so that positions can be mapped to slots with a
/// mask instead of a division.
pub fn spsc_queue<T>(
    capacity: usize,
) -> Result<(SpscProducer<T>, SpscConsumer<T>), InvalidCapacity> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(InvalidCapacity(capacity));
    }
    log::trace!("allocating an SPSC ring of {capacity} slots");

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();
    let ring = Arc::new(SpscRing {
        head: CachePadded::new(AtomicU64::new(0)),
        tail: CachePadded::new(AtomicU64::new(0)),
        mask: capacity as u64 - 1,
        slots,
    });

    Ok((
        SpscProducer {
            ring: ring.clone(),
            cached_head: 0,
        },
        SpscConsumer {
            ring,
            cached_tail: 0,
        },
    ))
}

impl<T> SpscProducer<T> {
    /// Push a value, or hand it back if the queue is full.
    ///
    /// Wait-free.  The release store on the tail counter is what publishes the element, so the
    /// slot write is complete before the consumer can see the new tail.
    pub fn push(&mut self, value: T) -> Result<(), Full<T>> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        if tail - self.cached_head == ring.capacity() {
            // Looks full; re-read the consumer's actual position before giving up.  The acquire
            // pairs with the consumer's release in pop, so the slot we are about to overwrite has
            // really been vacated.
            self.cached_head = ring.head.load(Ordering::Acquire);
            if tail - self.cached_head == ring.capacity() {
                return Err(Full(value));
            }
        }

        unsafe { (*ring.slot(tail)).write(value) };
        ring.tail.store(tail + 1, Ordering::Release);
        Ok(())
    }
}

impl<T> SpscConsumer<T> {
    /// Borrow the front element in place, or None if the queue is empty.
    ///
    /// The borrow is released by dropping it; the element itself stays in the queue until
    /// [`SpscConsumer::pop`].
    pub fn front(&mut self) -> Option<&T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Acquire);
        if head == self.cached_tail {
            // Looks empty; re-read the producer's actual position.  The acquire pairs with the
            // producer's release in push and makes the element's bytes visible.
            self.cached_tail = ring.tail.load(Ordering::Acquire);
            if head == self.cached_tail {
                return None;
            }
        }
        Some(unsafe { (*ring.slot(head)).assume_init_ref() })
    }

    /// Drop the front element and free its slot.
    ///
    /// Must only be called after [`SpscConsumer::front`] returned a value with no `pop` in
    /// between; that is the only way the consumer knows the slot is live.
    pub fn pop(&mut self) {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Acquire);
        debug_assert!(
            head != self.cached_tail,
            "pop() requires a preceding front() that returned a value"
        );
        unsafe { (*ring.slot(head)).assume_init_drop() };
        ring.head.store(head + 1, Ordering::Release);
    }
}
