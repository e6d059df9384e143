//! Primitives for synchronization on hot paths.
//!
//! This crate provides mechanisms whereby latency-critical threads can communicate with other
//! threads without taking a lock or entering the kernel.  General-purpose synchronization
//! primitives optimize for memory usage or average-case performance, but the important feature for
//! a scheduler, runtime, or allocator hot path is that the critical half of a communication
//! process completes in a bounded (or at least lock-free) number of steps.  Everything here is
//! built on atomic read-modify-write operations over cache-line-isolated fields; nothing blocks on
//! a mutex, condvar, or I/O.
//!
//! The primitives are independent of each other:
//!
//! - [`seq_lock`]: publish a single plain-data value from one writer to many readers, with
//!   wait-free writes and retrying reads.
//! - [`sticky_counter`]: reference counters that latch at zero, in a lock-free and a wait-free
//!   flavor with the same external contract.
//! - [`spsc_queue`]: a bounded single-producer single-consumer FIFO with wait-free operations on
//!   both sides and in-place access to the front element.
//! - [`mpmc_queue`]: a bounded multi-producer multi-consumer FIFO, lock-free via per-slot
//!   sequence numbers.

pub mod error;
pub mod mpmc_queue;
pub mod seq_lock;
pub mod spsc_queue;
pub mod sticky_counter;
mod sync;
