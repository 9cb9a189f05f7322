//! Type-level wait policies for the SPSC ring.
//!
//! The policy decides, at compile time, which side of the queue may block:
//! the blocking operations only exist on rings whose policy enables them,
//! and the size-counter updates use the cheaper relaxed ordering whenever
//! the opposite side can never wait.

/// Wait capability of a ring, chosen at the type level.
///
/// Users pick one of the four marker types ([`NoWait`], [`PushWait`],
/// [`PopWait`], [`BothWait`]) rather than implementing this trait.
/// The associated consts drive the memory ordering and notification
/// behavior of the size counter.
pub trait WaitPolicy {
    /// Whether the producer may block waiting for free space.
    const AWAIT_PUSHES: bool;

    /// Whether the consumer may block waiting for elements.
    const AWAIT_POPS: bool;
}

/// Marker trait: policies under which the producer may block.
pub trait PushWaiting: WaitPolicy {}

/// Marker trait: policies under which the consumer may block.
pub trait PopWaiting: WaitPolicy {}

/// Neither side ever blocks. Push and pop are pure atomics, no syscalls.
pub struct NoWait;

/// The producer may block on a full ring; the consumer never blocks.
pub struct PushWait;

/// The consumer may block on an empty ring; the producer never blocks.
pub struct PopWait;

/// Both sides may block.
pub struct BothWait;

impl WaitPolicy for NoWait {
    const AWAIT_PUSHES: bool = false;
    const AWAIT_POPS: bool = false;
}

impl WaitPolicy for PushWait {
    const AWAIT_PUSHES: bool = true;
    const AWAIT_POPS: bool = false;
}

impl WaitPolicy for PopWait {
    const AWAIT_PUSHES: bool = false;
    const AWAIT_POPS: bool = true;
}

impl WaitPolicy for BothWait {
    const AWAIT_PUSHES: bool = true;
    const AWAIT_POPS: bool = true;
}

impl PushWaiting for PushWait {}
impl PushWaiting for BothWait {}

impl PopWaiting for PopWait {}
impl PopWaiting for BothWait {}
