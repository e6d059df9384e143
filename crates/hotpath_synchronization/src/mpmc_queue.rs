//! A bounded MPMC queue built on per-slot sequence numbers.
//!
//! Any number of threads may push and pop concurrently.  Progress is lock-free rather than
//! wait-free: a thread that loses the claim race on `head` or `tail` retries, but some thread
//! wins every round.  Full and empty are reported to the caller; the queue never blocks and
//! never spins waiting for another thread's store to land.
//!
//! Each slot carries its own sequence number describing which logical cycle the slot is in and
//! whether it holds an element.  Producers and consumers claim a position with a CAS on the
//! shared counters, do their slot work, and then publish it by advancing the slot's sequence
//! number; the per-slot numbers are what keep a slow thread on a lapped position from touching
//! a slot that has since moved on.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crossbeam::utils::CachePadded;

use crate::error::{Full, InvalidCapacity};
use crate::sync::{AtomicU64, Ordering};

// Slot states, for position p mapping to this slot:
//
// - seq == p: empty, ready to be claimed for a push at p.
// - seq == p + 1: full, ready to be claimed for a pop at p.
// - anything in between: claimed but not yet published; the observing thread's comparison tells
//   it whether to report full/empty (seq fell behind its position) or to re-read the shared
//   counter (seq is ahead, so the counter moved past it).
//
// A pop releases the slot at seq = p + capacity, which is exactly the "empty" state for the next
// position that maps here.

struct Slot<T> {
    seq: CachePadded<AtomicU64>,
    // On its own cache line too, so a producer publishing into one slot doesn't contend with a
    // consumer reading a neighboring slot's storage.
    storage: CachePadded<UnsafeCell<MaybeUninit<T>>>,
}

/// A bounded multi-producer multi-consumer FIFO.
///
/// Share it by reference (or inside an `Arc`); both [`MpmcQueue::push`] and [`MpmcQueue::pop`]
/// take `&self`.
pub struct MpmcQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a queue with room for `capacity` elements.
    ///
    /// The capacity must be a nonzero power of two so that positions can be mapped to slots with
    /// a mask instead of a division.
    pub fn new(capacity: usize) -> Result<Self, InvalidCapacity> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(InvalidCapacity(capacity));
        }
        log::trace!("allocating an MPMC ring of {capacity} slots");

        let slots = (0..capacity as u64)
            .map(|i| Slot {
                seq: CachePadded::new(AtomicU64::new(i)),
                storage: CachePadded::new(UnsafeCell::new(MaybeUninit::uninit())),
            })
            .collect();

        Ok(Self {
            slots,
            mask: capacity as u64 - 1,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// The fixed capacity this queue was created with.
    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos & self.mask) as usize]
    }

    /// Push a value, or hand it back if the queue is full.
    ///
    /// The acquire load of the slot's sequence number pairs with the release store of the
    /// consumer that last vacated it, so the slot is really free by the time we write into it.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(pos);
            let seq = slot.seq.load(Ordering::Acquire);
            if seq == pos {
                // The slot is free for this position; try to claim it.
                match self.tail.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.storage.get()).write(value) };
                        slot.seq.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if seq < pos {
                // The slot still holds the element from one lap ago: the queue is full at the
                // position we attempted.
                return Err(Full(value));
            } else {
                // Another producer got here first; chase the counter.
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop the oldest element, or None if the queue is empty.
    ///
    /// The acquire load of the slot's sequence number pairs with the release store of the
    /// producer that filled it, making the element's bytes visible before they are moved out.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(pos);
            let seq = slot.seq.load(Ordering::Acquire);
            if seq == pos + 1 {
                // The slot holds the element for this position; try to claim it.
                match self.head.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.storage.get()).assume_init_read() };
                        // Hand the slot to the producer that will next map onto it.
                        slot.seq.store(pos + self.mask + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if seq < pos + 1 {
                // No producer has published at this position yet: empty.
                return None;
            } else {
                // Another consumer got here first; chase the counter.
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        // Walk the logical positions still in the queue rather than testing each slot index for
        // `seq == i + 1`: after a wrap, a full slot carries seq = p + 1 for its *position* p, not
        // for its index, and the index test would leak everything pushed after the first lap.
        let mut pos = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        while pos != tail {
            let slot = self.slot(pos);
            if slot.seq.load(Ordering::Relaxed) == pos + 1 {
                unsafe { (*slot.storage.get()).assume_init_drop() };
            }
            pos += 1;
        }
    }
}
