//! Safe SPSC channel over the lock-free [`Ring`].
//!
//! A bounded queue split into two single-owner endpoints:
//!
//! - [`Producer`] - Write end (single producer per queue)
//! - [`Consumer`] - Read end (single consumer per queue)
//!
//! The endpoints enforce the ring's SPSC role contract through the type
//! system, own the storage lifecycle (allocated at construction, drained
//! and freed when the last endpoint drops), and expose the blocking
//! operations permitted by the chosen [wait policy](crate::policy).
//!
//! # Example
//!
//! ```
//! use styx::{NoWait, spsc};
//!
//! let (producer, consumer) = spsc::channel::<u64, NoWait>(1024).unwrap();
//!
//! // Producer thread
//! producer.push(42).expect("queue full");
//!
//! // Consumer thread
//! assert_eq!(consumer.pop(), Some(42));
//! ```
//!
//! With a waiting policy, the producer can end the stream and blocked
//! consumers drain and then observe the end:
//!
//! ```
//! use styx::{PopWait, spsc};
//!
//! let (producer, consumer) = spsc::channel::<String, PopWait>(16).unwrap();
//! producer.push("last words".to_string()).unwrap();
//! producer.close();
//!
//! assert_eq!(consumer.pop_blocking().as_deref(), Some("last words"));
//! assert_eq!(consumer.pop_blocking(), None);
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::alloc::{AllocError, BufferAllocator, Heap};
use crate::policy::{NoWait, PopWaiting, PushWaiting, WaitPolicy};
use crate::ring::Ring;

/// Ring plus the allocator its storage came from.
///
/// The last endpoint to drop is the sole remaining user, so it can safely
/// drain whatever the consumer left behind and hand the storage back.
struct Shared<T: Send, W: WaitPolicy, A: BufferAllocator> {
    ring: Ring<T, W>,
    alloc: A,
}

impl<T: Send, W: WaitPolicy, A: BufferAllocator> Drop for Shared<T, W, A> {
    fn drop(&mut self) {
        // SAFETY: `Arc` runs this drop on the last owner only, so no
        // concurrent producer or consumer remains; acting as the consumer
        // here cannot race with anything.
        while let Some(item) = unsafe { self.ring.pop() } {
            drop(item);
        }
        self.ring.free(&mut self.alloc);
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// Only one producer exists per queue; the endpoint is not cloneable and
/// not [`Sync`], so the single-producer contract holds by construction:
/// - Ownership can move to another thread
/// - `&Producer` cannot be shared across threads (no concurrent `push()`)
pub struct Producer<T: Send, W: WaitPolicy = NoWait, A: BufferAllocator = Heap> {
    shared: Arc<Shared<T, W, A>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue.
///
/// Only one consumer exists per queue; see [`Producer`] for the thread
/// safety reasoning (same semantics apply).
pub struct Consumer<T: Send, W: WaitPolicy = NoWait, A: BufferAllocator = Heap> {
    shared: Arc<Shared<T, W, A>>,
    _unsync: PhantomUnsync,
}

/// Creates a heap-backed SPSC channel with the given capacity.
///
/// Returns a `(Producer, Consumer)` pair; each can be sent to a different
/// thread. The `W` parameter picks the [wait policy](crate::policy).
///
/// # Errors
///
/// Returns [`AllocError`] if the heap declines the storage request.
///
/// # Panics
///
/// Panics if `capacity` is zero or exceeds `i32::MAX / 2`.
pub fn channel<T, W>(capacity: usize) -> Result<(Producer<T, W>, Consumer<T, W>), AllocError>
where
    T: Send,
    W: WaitPolicy,
{
    channel_in(Heap, capacity)
}

/// Creates an SPSC channel whose storage comes from `alloc`.
///
/// The allocator moves into the channel and receives the storage back when
/// the last endpoint drops, so every successful allocation is balanced by
/// exactly one free.
///
/// # Errors
///
/// Returns [`AllocError`] if `alloc` declines the storage request.
///
/// # Panics
///
/// Panics if `capacity` is zero or exceeds `i32::MAX / 2`.
pub fn channel_in<T, W, A>(
    mut alloc: A,
    capacity: usize,
) -> Result<(Producer<T, W, A>, Consumer<T, W, A>), AllocError>
where
    T: Send,
    W: WaitPolicy,
    A: BufferAllocator,
{
    let mut ring = Ring::<T, W>::new();
    ring.allocate(&mut alloc, capacity)?;

    let shared = Arc::new(Shared { ring, alloc });

    let producer = Producer {
        shared: Arc::clone(&shared),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        shared,
        _unsync: PhantomData,
    };

    Ok((producer, consumer))
}

impl<T: Send, W: WaitPolicy, A: BufferAllocator> Producer<T, W, A> {
    /// Attempts to push an item (lock-free, no syscalls).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this endpoint is the unique producer (not Clone, not
        // Sync), and the ring was allocated at construction.
        unsafe { self.shared.ring.push(item) }
    }

    /// Pushes as much of `items` as fits, returning the unconsumed suffix.
    ///
    /// One release store per batch instead of one per element; worthwhile
    /// whenever the producer naturally has elements in hand as a slice.
    #[inline]
    pub fn push_slice<'a>(&self, items: &'a [T]) -> &'a [T]
    where
        T: Copy,
    {
        // SAFETY: as in `push`.
        unsafe { self.shared.ring.push_slice(items) }
    }

    /// Pushes `item`, sleeping while the queue is full.
    #[inline]
    pub fn push_blocking(&self, item: T)
    where
        W: PushWaiting,
    {
        // SAFETY: as in `push`.
        unsafe { self.shared.ring.push_blocking(item) }
    }

    /// Pushes all of `items`, sleeping whenever the queue fills up.
    #[inline]
    pub fn push_slice_blocking(&self, items: &[T])
    where
        W: PushWaiting,
        T: Copy,
    {
        // SAFETY: as in `push`.
        unsafe { self.shared.ring.push_slice_blocking(items) }
    }

    /// Declares the stream ended: blocked consumers wake, drain whatever
    /// remains, and then see `None`.
    pub fn close(&self)
    where
        W: PopWaiting,
    {
        self.shared.ring.close();
    }

    /// Undoes [`close`](Producer::close), restoring indefinite blocking
    /// pops.
    pub fn reopen(&self)
    where
        W: PopWaiting,
    {
        self.shared.ring.reopen();
    }

    /// Number of elements currently queued.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    /// Whether the queue is currently empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    /// Queue capacity in elements.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

impl<T: Send, W: WaitPolicy, A: BufferAllocator> Consumer<T, W, A> {
    /// Attempts to pop an item (lock-free, no syscalls).
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: this endpoint is the unique consumer (not Clone, not
        // Sync), and the ring was allocated at construction.
        unsafe { self.shared.ring.pop() }
    }

    /// Moves queued elements into `out` up to its spare capacity, in FIFO
    /// order. Never grows the vector; returns the number appended.
    #[inline]
    pub fn pop_into(&self, out: &mut Vec<T>) -> usize {
        // SAFETY: as in `pop`.
        unsafe { self.shared.ring.pop_into(out) }
    }

    /// Pops an item, sleeping while the queue is empty.
    ///
    /// Returns `None` only once the producer has
    /// [closed](Producer::close) the stream and the queue is drained.
    #[inline]
    #[must_use]
    pub fn pop_blocking(&self) -> Option<T>
    where
        W: PopWaiting,
    {
        // SAFETY: as in `pop`.
        unsafe { self.shared.ring.pop_blocking() }
    }

    /// Moves elements into `out`, sleeping while the queue is empty.
    ///
    /// Returns the number appended; 0 only when `out` has no spare room or
    /// the stream is closed and drained.
    #[inline]
    pub fn pop_into_blocking(&self, out: &mut Vec<T>) -> usize
    where
        W: PopWaiting,
    {
        // SAFETY: as in `pop`.
        unsafe { self.shared.ring.pop_into_blocking(out) }
    }

    /// Number of elements currently queued.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    /// Whether the queue is currently empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    /// Queue capacity in elements.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}
