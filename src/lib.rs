//! Bounded lock-free SPSC queue over a caller-allocated ring buffer.
//!
//! The crate has two layers:
//!
//! - [`ring::Ring`] - The core data structure: a fixed-capacity circular
//!   buffer with atomic push/pop indices, an explicit allocate/free storage
//!   lifecycle, batch operations, and (policy-gated) futex-backed blocking.
//!   Its operations are `unsafe` because the caller must uphold the SPSC
//!   role contract.
//! - [`spsc`] - A safe `(Producer, Consumer)` channel wrapper that owns the
//!   storage lifecycle and enforces the single-producer/single-consumer
//!   contract through the type system.
//!
//! Blocking is opt-in at the type level via a [`policy`] parameter, so a
//! queue that never waits pays nothing for the wait machinery.

pub mod alloc;
pub mod policy;
pub mod ring;
pub mod spsc;
pub mod trace;

pub(crate) mod futex;

pub use alloc::{AllocError, BufferAllocator, Heap};
pub use policy::{BothWait, NoWait, PopWait, PopWaiting, PushWait, PushWaiting, WaitPolicy};
pub use ring::Ring;
pub use spsc::{Consumer, Producer, channel, channel_in};
