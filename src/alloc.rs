//! The allocator contract consumed by [`Ring`](crate::ring::Ring).
//!
//! The ring owns no allocation machinery of its own: storage is requested
//! from and returned to a caller-supplied [`BufferAllocator`]. This keeps
//! the data structure usable with arenas, pools, or instrumented test
//! allocators, while [`Heap`] covers the common case.

use std::alloc;
use std::alloc::Layout;
use std::ptr::NonNull;

use thiserror::Error;

/// The allocator declined a storage request.
///
/// This is the only recoverable error on the allocation path; the ring is
/// left unchanged and may be retried with a smaller capacity or a different
/// allocator.
#[derive(Debug, Error)]
#[error("buffer allocation of {size} bytes (align {align}) failed")]
pub struct AllocError {
    /// Requested size in bytes.
    pub size: usize,
    /// Requested alignment in bytes.
    pub align: usize,
}

/// Source of raw storage for a ring.
///
/// Implementations hand out buffers of at least `layout.size()` bytes at
/// `layout.align()` alignment, and accept them back with the same layout.
/// Returning `None` from [`allocate`](Self::allocate) signals out-of-memory.
pub trait BufferAllocator {
    /// Requests a buffer for `layout`, or `None` if the request cannot be
    /// satisfied. `layout.size()` is never zero.
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns a buffer previously handed out by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from a call to `allocate` on this same allocator with
    /// this same `layout`, and must not be returned twice.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout);
}

/// [`BufferAllocator`] backed by the global heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

impl BufferAllocator for Heap {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        // SAFETY: the trait contract guarantees layout.size() > 0.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded from the caller's contract: `ptr` came from
        // `alloc::alloc` with this layout.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}
