//! Core lock-free SPSC ring buffer.
//!
//! A bounded FIFO over a caller-allocated storage region. One thread pushes
//! at the write index, one thread pops at the read index; the two indices
//! are published with release/acquire ordering so slot contents and slot
//! reuse are correctly synchronized without any lock.
//!
//! # Index protocol
//!
//! Both indices count *unwrapped* positions in `[0, index_end)`, where
//! `index_end` is the largest multiple of the capacity not exceeding
//! `i32::MAX` (at least two full laps). The slot for an index is
//! `index % capacity`. Because `index_end` is a multiple of the capacity,
//! the difference `push_index - pop_index` distinguishes *empty* (0) from
//! *full* (`capacity`, or `capacity - index_end` after a wrap) for any
//! capacity, not just powers of two.
//!
//! # Size counter
//!
//! A separate 32-bit counter tracks the element count in its low 31 bits
//! and doubles as the futex word for the blocking operations. The high bit
//! is a terminal flag: once set by [`Ring::close`], blocked consumers wake
//! and report end-of-stream after draining. Notifications are issued only
//! on the empty→non-empty and full→non-full edges, so syscall frequency
//! tracks contention rather than throughput.
//!
//! # Safety
//!
//! Push-side and pop-side operations are `unsafe` because they require the
//! caller to uphold the SPSC invariant: at most one thread acts as producer
//! and at most one as consumer, with no concurrent access to either role.
//! The safe [`crate::spsc`] wrapper enforces this through the type system.

use std::marker::PhantomData;
use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::alloc::{AllocError, BufferAllocator};
use crate::futex;
use crate::policy::{NoWait, PopWaiting, PushWaiting, WaitPolicy};
use crate::trace::debug;

/// Cache line size used for padding and storage alignment.
///
/// 64 bytes matches current x86-64 and most aarch64 parts; the cost of
/// over-aligning on exotic hardware is a few bytes per ring.
const CACHE_LINE_SIZE: usize = 64;

/// High bit of the size word: the producer has declared the stream closed.
const CLOSED: u32 = 0x8000_0000;

/// Index cell owned by exactly one side, alone on its cache line.
///
/// The producer writes only `push_index`, the consumer only `pop_index`;
/// keeping them on separate lines stops each side's stores from
/// invalidating the other side's cached copy of its own index.
#[repr(C)]
#[repr(align(64))]
struct PaddedIndex {
    value: AtomicI32,
}

/// The shared size counter / futex word, alone on its cache line.
#[repr(C)]
#[repr(align(64))]
struct PaddedCounter {
    value: AtomicU32,
}

/// Bounded SPSC ring buffer over caller-allocated storage.
///
/// A ring starts *unallocated*: [`allocate`](Ring::allocate) attaches
/// storage from a [`BufferAllocator`], [`free`](Ring::free) returns it.
/// Dropping a ring that still owns storage is a contract violation, as is
/// freeing a non-empty ring - the ring cannot safely run destructors for
/// live elements while a concurrent user may exist.
///
/// The `W` parameter selects which sides may block; see [`crate::policy`].
#[repr(C)]
pub struct Ring<T, W: WaitPolicy = NoWait> {
    /// Write index. Written only by the producer.
    push_index: PaddedIndex,

    /// Read index. Written only by the consumer.
    pop_index: PaddedIndex,

    /// Element count (low 31 bits) plus terminal flag (high bit).
    /// Written by both sides; the futex word for blocking operations.
    size: PaddedCounter,

    /// Slot storage. Null while unallocated; slots hold live values only
    /// between their construction and removal.
    storage: *mut T,

    /// Number of slots. Immutable between allocate and free.
    capacity: i32,

    /// Unwrapped indices wrap to zero here; a multiple of `capacity`.
    index_end: i32,

    _policy: PhantomData<W>,
}

// SAFETY: the ring stores `T` values inline and hands them across threads,
// so it is Send/Sync exactly when T is Send. Concurrent access to the slots
// is mediated by the release/acquire index protocol under the documented
// SPSC role contract.
unsafe impl<T: Send, W: WaitPolicy> Send for Ring<T, W> {}
unsafe impl<T: Send, W: WaitPolicy> Sync for Ring<T, W> {}

impl<T, W: WaitPolicy> Ring<T, W> {
    /// Creates an unallocated ring. Attach storage with
    /// [`allocate`](Ring::allocate) before use.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            push_index: PaddedIndex {
                value: AtomicI32::new(0),
            },
            pop_index: PaddedIndex {
                value: AtomicI32::new(0),
            },
            size: PaddedCounter {
                value: AtomicU32::new(0),
            },
            storage: ptr::null_mut(),
            capacity: 0,
            index_end: 0,
            _policy: PhantomData,
        }
    }

    /// Whether the ring currently owns storage.
    #[inline]
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        !self.storage.is_null()
    }

    /// Number of elements currently in the ring.
    ///
    /// A relaxed observation: exact only at quiescent points, otherwise a
    /// value that was correct at some recent instant.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        (self.size.value.load(Ordering::Relaxed) & !CLOSED) as usize
    }

    /// Whether the ring currently holds no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, or 0 while unallocated.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Attaches storage for `capacity` slots from `alloc`.
    ///
    /// On success the ring is empty with both indices at zero. On
    /// allocation failure the ring is left unallocated and the request can
    /// be retried.
    ///
    /// # Panics
    ///
    /// Panics if the ring is already allocated, if `capacity` is zero, or
    /// if `capacity` exceeds `i32::MAX / 2` (the index protocol needs at
    /// least two full laps before wrapping).
    pub fn allocate<A: BufferAllocator>(
        &mut self,
        alloc: &mut A,
        capacity: usize,
    ) -> Result<(), AllocError> {
        assert!(
            !self.is_allocated(),
            "can't allocate while still owning storage"
        );
        assert!(capacity > 0, "invalid capacity {capacity}");
        assert!(
            capacity <= (i32::MAX / 2) as usize,
            "capacity {capacity} leaves fewer than two index wrap-arounds"
        );

        let layout = std::alloc::Layout::array::<T>(capacity)
            .expect("slot storage size overflows")
            .align_to(CACHE_LINE_SIZE.max(align_of::<T>()))
            .expect("storage alignment is not a power of two");

        self.storage = if layout.size() == 0 {
            // Zero-sized elements need no storage, only a well-aligned
            // non-null pointer.
            NonNull::<T>::dangling().as_ptr()
        } else {
            match alloc.allocate(layout) {
                Some(raw) => raw.as_ptr().cast::<T>(),
                None => {
                    return Err(AllocError {
                        size: layout.size(),
                        align: layout.align(),
                    });
                }
            }
        };

        self.capacity = capacity as i32;
        // Largest multiple of the capacity that fits in i32: indices make
        // `i32::MAX / capacity` full laps before wrapping to zero.
        self.index_end = self.capacity * (i32::MAX / self.capacity);

        debug!(capacity, "ring storage allocated");
        Ok(())
    }

    /// Returns the storage to `alloc` and resets the ring to unallocated.
    ///
    /// Indices, the size counter, and the terminal flag are all cleared, so
    /// the ring can be allocated again afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the ring is unallocated or still holds elements. The ring
    /// cannot drop live elements itself: which slots are live is only
    /// knowable when no concurrent user exists, which the caller asserts by
    /// draining first.
    pub fn free<A: BufferAllocator>(&mut self, alloc: &mut A) {
        assert!(self.is_allocated(), "no storage to free");
        assert!(self.is_empty(), "can't free until empty");

        let layout = std::alloc::Layout::array::<T>(self.capacity as usize)
            .expect("slot storage size overflows")
            .align_to(CACHE_LINE_SIZE.max(align_of::<T>()))
            .expect("storage alignment is not a power of two");

        if layout.size() != 0 {
            // SAFETY: `storage` came from `alloc.allocate` with this exact
            // layout in `allocate`, and is returned exactly once - the null
            // store below makes a second free trip the is_allocated assert.
            unsafe {
                alloc.deallocate(NonNull::new_unchecked(self.storage.cast::<u8>()), layout);
            }
        }

        debug!(capacity = self.capacity, "ring storage freed");

        self.storage = ptr::null_mut();
        self.capacity = 0;
        self.index_end = 0;
        self.push_index.value.store(0, Ordering::Relaxed);
        self.pop_index.value.store(0, Ordering::Relaxed);
        self.size.value.store(0, Ordering::Relaxed);
    }

    /// Advances an unwrapped index by one slot.
    #[inline]
    fn bump_index(&self, index: i32) -> i32 {
        let next = index + 1;
        if next < self.index_end { next } else { 0 }
    }

    /// Advances an unwrapped index by `by` slots (`by <= capacity`).
    ///
    /// Widened to i64 because `index + by` can exceed `i32::MAX` when
    /// `index_end` sits near it.
    #[inline]
    fn advance_index(&self, index: i32, by: i32) -> i32 {
        let mut next = index as i64 + by as i64;
        if next >= self.index_end as i64 {
            next -= self.index_end as i64;
        }
        next as i32
    }

    /// Records `pushed` new elements and wakes empty-queue waiters.
    #[inline]
    fn increase_size(&self, pushed: i32) {
        // Release if the pop side can wait (a waiter that observes the new
        // count with acquire must also observe the published index), else
        // relaxed.
        let order = if W::AWAIT_POPS {
            Ordering::Release
        } else {
            Ordering::Relaxed
        };
        let prior = self.size.value.fetch_add(pushed as u32, order);

        if W::AWAIT_POPS && prior == 0 {
            // Only the empty→non-empty edge can have consumers asleep.
            // No need to mask the terminal flag: if it is set, pop waiting
            // already ended and nobody sleeps on zero.
            futex::wake_all(&self.size.value);
        }
    }

    /// Records `popped` removed elements and wakes full-queue waiters.
    #[inline]
    fn decrease_size(&self, popped: i32) {
        let order = if W::AWAIT_PUSHES {
            Ordering::Release
        } else {
            Ordering::Relaxed
        };
        let prior = self.size.value.fetch_sub(popped as u32, order);

        if W::AWAIT_PUSHES && (prior & !CLOSED) == self.capacity as u32 {
            // Only the full→non-full edge can have the producer asleep.
            futex::wake_all(&self.size.value);
        }
    }

    /// Attempts to push an item.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the ring is full, so the caller can retry or
    /// hand the value elsewhere.
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - Only one thread at a time acts as the producer
    /// - The ring is allocated
    #[inline]
    pub unsafe fn push(&self, item: T) -> Result<(), T> {
        // Producer is the sole writer of push_index: relaxed.
        let push = self.push_index.value.load(Ordering::Relaxed);
        // Acquire pairs with the consumer's release store, so the previous
        // occupant of a recycled slot is fully vacated before we overwrite.
        let pop = self.pop_index.value.load(Ordering::Acquire);

        let delta = push - pop;
        if delta == self.capacity || delta == self.capacity - self.index_end {
            return Err(item); // Full. The second form catches wrap-around.
        }

        let slot = (push % self.capacity) as usize;
        // SAFETY: the full check guarantees the consumer is not reading this
        // slot, `slot < capacity` keeps the write in bounds, and the slot is
        // uninitialized, so a plain write (no drop of old contents) is
        // correct.
        unsafe {
            self.storage.add(slot).write(item);
        }

        // Release pairs with the consumer's acquire load: the slot write
        // above is visible before the new index is.
        self.push_index
            .value
            .store(self.bump_index(push), Ordering::Release);

        self.increase_size(1);
        Ok(())
    }

    /// Attempts to pop an item. Returns `None` if the ring is empty.
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - Only one thread at a time acts as the consumer
    /// - The ring is allocated
    #[inline]
    #[must_use]
    pub unsafe fn pop(&self) -> Option<T> {
        // Acquire pairs with the producer's release store: the slot
        // contents are visible before we read them.
        let push = self.push_index.value.load(Ordering::Acquire);
        // Consumer is the sole writer of pop_index: relaxed.
        let pop = self.pop_index.value.load(Ordering::Relaxed);

        if push == pop {
            return None; // Empty.
        }

        let slot = (pop % self.capacity) as usize;
        // SAFETY: push != pop means this slot holds a live value the
        // producer published; reading it out returns the slot to
        // uninitialized, which the release store below makes visible.
        let item = unsafe { self.storage.add(slot).read() };

        // Release pairs with the producer's acquire load: the slot is
        // vacated before the producer can see the new index and reuse it.
        self.pop_index
            .value
            .store(self.bump_index(pop), Ordering::Release);

        self.decrease_size(1);
        Some(item)
    }

    /// Pushes as much of `items` as fits, returning the unconsumed suffix.
    ///
    /// The copy runs in one or two contiguous spans (two when it wraps past
    /// the storage end) and publishes the new index with a single release
    /// store, amortizing the expensive part of a push over the batch.
    ///
    /// # Safety
    ///
    /// Same contract as [`push`](Ring::push).
    pub unsafe fn push_slice<'a>(&self, items: &'a [T]) -> &'a [T]
    where
        T: Copy,
    {
        let push = self.push_index.value.load(Ordering::Relaxed);
        let pop = self.pop_index.value.load(Ordering::Acquire);

        // Slots available up to the consumer's index. Widened to i64: near
        // index_end the intermediate sum can exceed i32::MAX.
        let mut available = pop as i64 + self.capacity as i64 - push as i64;
        if available >= self.index_end as i64 {
            available -= self.index_end as i64;
        }
        let count = items.len().min(available as usize);
        if count == 0 {
            return items; // Full.
        }

        let slot = (push % self.capacity) as usize;
        let first_run = count.min(self.capacity as usize - slot);
        // SAFETY: the availability check guarantees the consumer owns none
        // of the `count` slots starting at `slot`; both runs stay in
        // bounds, and `T: Copy` makes the byte copy a valid duplication of
        // the source values.
        unsafe {
            ptr::copy_nonoverlapping(items.as_ptr(), self.storage.add(slot), first_run);
            if first_run < count {
                ptr::copy_nonoverlapping(
                    items.as_ptr().add(first_run),
                    self.storage,
                    count - first_run,
                );
            }
        }

        self.push_index
            .value
            .store(self.advance_index(push, count as i32), Ordering::Release);

        self.increase_size(count as i32);
        &items[count..]
    }

    /// Moves elements into `out` up to its spare capacity, in FIFO order.
    ///
    /// Never grows the vector; returns the number appended (0 when the ring
    /// is empty or `out` has no spare room). Like
    /// [`push_slice`](Ring::push_slice), the move runs in at most two spans
    /// with a single release publish.
    ///
    /// # Safety
    ///
    /// Same contract as [`pop`](Ring::pop).
    pub unsafe fn pop_into(&self, out: &mut Vec<T>) -> usize {
        let push = self.push_index.value.load(Ordering::Acquire);
        let pop = self.pop_index.value.load(Ordering::Relaxed);

        let mut available = push - pop;
        if available < 0 {
            available += self.index_end;
        }
        let room = out.capacity() - out.len();
        let count = room.min(available as usize);
        if count == 0 {
            return 0; // Empty, or no room in `out`.
        }

        let slot = (pop % self.capacity) as usize;
        let first_run = count.min(self.capacity as usize - slot);
        // SAFETY: push/pop bracket `count` live slots starting at `slot`;
        // the copies move those values into the vector's spare capacity,
        // returning the slots to uninitialized, and set_len covers exactly
        // the elements just written.
        unsafe {
            let dst = out.spare_capacity_mut().as_mut_ptr().cast::<T>();
            ptr::copy_nonoverlapping(self.storage.add(slot), dst, first_run);
            if first_run < count {
                ptr::copy_nonoverlapping(self.storage, dst.add(first_run), count - first_run);
            }
            out.set_len(out.len() + count);
        }

        self.pop_index
            .value
            .store(self.advance_index(pop, count as i32), Ordering::Release);

        self.decrease_size(count as i32);
        count
    }

    /// Pushes `item`, sleeping while the ring is full.
    ///
    /// # Safety
    ///
    /// Same contract as [`push`](Ring::push).
    pub unsafe fn push_blocking(&self, mut item: T)
    where
        W: PushWaiting,
    {
        loop {
            match unsafe { self.push(item) } {
                Ok(()) => return,
                Err(returned) => {
                    item = returned;
                    // Sleeps only while the counter reads `capacity`; the
                    // consumer notifies on the full→non-full edge.
                    futex::wait(&self.size.value, self.capacity as u32);
                }
            }
        }
    }

    /// Pushes all of `items`, sleeping whenever the ring fills up.
    ///
    /// # Safety
    ///
    /// Same contract as [`push`](Ring::push).
    pub unsafe fn push_slice_blocking(&self, mut items: &[T])
    where
        W: PushWaiting,
        T: Copy,
    {
        loop {
            items = unsafe { self.push_slice(items) };
            if items.is_empty() {
                return;
            }
            futex::wait(&self.size.value, self.capacity as u32);
        }
    }

    /// Pops an item, sleeping while the ring is empty.
    ///
    /// Returns `None` only after [`close`](Ring::close) has been called and
    /// the ring is drained: the stream has ended and no further pops will
    /// succeed (until [`reopen`](Ring::reopen)).
    ///
    /// # Safety
    ///
    /// Same contract as [`pop`](Ring::pop).
    #[must_use]
    pub unsafe fn pop_blocking(&self) -> Option<T>
    where
        W: PopWaiting,
    {
        loop {
            if let Some(item) = unsafe { self.pop() } {
                return Some(item);
            }

            // Sleeps only while the counter reads zero; the producer
            // notifies on the empty→non-empty edge and `close` notifies
            // waiters directly.
            futex::wait(&self.size.value, 0);

            // The terminal flag alone means closed *and* drained. A missed
            // observation just repeats the loop.
            if self.size.value.load(Ordering::Relaxed) == CLOSED {
                return None;
            }
        }
    }

    /// Moves elements into `out`, sleeping while the ring is empty.
    ///
    /// Returns the number appended; 0 only when `out` has no spare room or
    /// the stream is closed and drained.
    ///
    /// # Safety
    ///
    /// Same contract as [`pop`](Ring::pop).
    pub unsafe fn pop_into_blocking(&self, out: &mut Vec<T>) -> usize
    where
        W: PopWaiting,
    {
        if out.capacity() == out.len() {
            return 0; // Nowhere to put elements; don't sleep on a full Vec.
        }
        loop {
            let popped = unsafe { self.pop_into(out) };
            if popped != 0 {
                return popped;
            }

            futex::wait(&self.size.value, 0);

            if self.size.value.load(Ordering::Relaxed) == CLOSED {
                return 0;
            }
        }
    }

    /// Producer-side shutdown: declares that no further pushes will occur.
    ///
    /// Blocked [`pop_blocking`](Ring::pop_blocking) calls wake, drain any
    /// residual elements, and then return `None`. Non-blocking pops are
    /// unaffected.
    pub fn close(&self)
    where
        W: PopWaiting,
    {
        // Release publishes the final index values to a consumer that wakes
        // and observes the flag.
        let prior = self.size.value.fetch_or(CLOSED, Ordering::Release);

        // Consumers can only be asleep when the count was zero.
        if prior == 0 {
            futex::wake_all(&self.size.value);
        }

        debug!("pop side closed");
    }

    /// Clears the terminal flag set by [`close`](Ring::close), restoring
    /// indefinite blocking pops.
    pub fn reopen(&self)
    where
        W: PopWaiting,
    {
        // Queue state is unchanged; nothing to synchronize.
        self.size.value.fetch_and(!CLOSED, Ordering::Relaxed);

        debug!("pop side reopened");
    }
}

impl<T, W: WaitPolicy> Default for Ring<T, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, W: WaitPolicy> Drop for Ring<T, W> {
    fn drop(&mut self) {
        // The ring cannot know which slots are live without excluding
        // concurrent users, so owning storage here is a contract violation
        // rather than something to clean up silently.
        assert!(
            !self.is_allocated(),
            "ring dropped while still owning storage; drain and call free() first"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Heap;
    use crate::policy::PopWait;
    use std::mem::offset_of;

    #[test]
    fn hot_fields_sit_on_separate_cache_lines() {
        assert_eq!(align_of::<PaddedIndex>(), CACHE_LINE_SIZE);
        assert_eq!(size_of::<PaddedIndex>(), CACHE_LINE_SIZE);
        assert_eq!(align_of::<PaddedCounter>(), CACHE_LINE_SIZE);
        assert_eq!(size_of::<PaddedCounter>(), CACHE_LINE_SIZE);

        type TestRing = Ring<u64>;
        assert_eq!(offset_of!(TestRing, push_index), 0);
        assert_eq!(offset_of!(TestRing, pop_index), CACHE_LINE_SIZE);
        assert_eq!(offset_of!(TestRing, size), 2 * CACHE_LINE_SIZE);
    }

    #[test]
    fn index_end_is_the_largest_multiple_of_capacity() {
        let mut ring = Ring::<u32>::new();
        ring.allocate(&mut Heap, 3).unwrap();

        assert_eq!(ring.index_end, 3 * (i32::MAX / 3));
        assert_eq!(ring.index_end % 3, 0);
        assert!(ring.index_end / 3 >= 2);

        // Bumping past the end wraps to zero; bulk advances do too.
        assert_eq!(ring.bump_index(ring.index_end - 1), 0);
        assert_eq!(ring.bump_index(0), 1);
        assert_eq!(ring.advance_index(ring.index_end - 2, 3), 1);
        assert_eq!(ring.advance_index(5, 3), 8);

        ring.free(&mut Heap);
    }

    #[test]
    fn full_and_empty_are_distinguished() {
        let mut ring = Ring::<i32>::new();
        ring.allocate(&mut Heap, 2).unwrap();

        unsafe {
            assert!(ring.is_empty());
            assert!(ring.pop().is_none());

            assert!(ring.push(1).is_ok());
            assert!(ring.push(2).is_ok());
            assert_eq!(ring.push(3), Err(3));
            assert_eq!(ring.len(), 2);

            assert_eq!(ring.pop(), Some(1));
            assert_eq!(ring.pop(), Some(2));
            assert!(ring.pop().is_none());
        }

        ring.free(&mut Heap);
    }

    #[test]
    fn closed_flag_is_masked_out_of_len() {
        let mut ring = Ring::<i32, PopWait>::new();
        ring.allocate(&mut Heap, 2).unwrap();

        unsafe {
            ring.push(7).unwrap();
            ring.close();
            assert_eq!(ring.len(), 1);
            assert!(!ring.is_empty());

            // Residual elements still drain after close.
            assert_eq!(ring.pop(), Some(7));
            assert!(ring.is_empty());

            // Closed and drained: returns None without blocking.
            assert!(ring.pop_blocking().is_none());

            ring.reopen();
        }

        ring.free(&mut Heap);
    }

    #[test]
    fn freed_ring_can_be_reallocated() {
        let mut ring = Ring::<u8>::new();
        ring.allocate(&mut Heap, 4).unwrap();

        unsafe {
            // Advance the indices away from zero before freeing.
            for i in 0..6 {
                ring.push(i).unwrap();
                assert_eq!(ring.pop(), Some(i));
            }
        }
        ring.free(&mut Heap);
        assert!(!ring.is_allocated());

        ring.allocate(&mut Heap, 2).unwrap();
        unsafe {
            ring.push(9).unwrap();
            ring.push(10).unwrap();
            assert_eq!(ring.push(11), Err(11));
            assert_eq!(ring.pop(), Some(9));
            assert_eq!(ring.pop(), Some(10));
        }
        ring.free(&mut Heap);
    }
}
