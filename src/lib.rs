//! # brkalloc - a free-list allocator over the program break
//!
//! Drop-in semantics for `malloc`/`free`/`calloc`/`realloc`, built on the
//! raw heap-growth primitive: one contiguous span that grows at the break,
//! block headers living in place right before the client's bytes, and a
//! circular free list that recycles released blocks before ever asking the
//! OS for more.
//!
//! ```text
//!   The heap span:
//!
//!   base                                                        break
//!   |                                                           |
//!   v                                                           v
//!   +--------+---------+--------+---------+--------+------------+
//!   | Header | content | Header | content | Header |  content   |
//!   +--------+---------+--------+---------+--------+------------+
//!   |        allocated |           free   |          allocated  |
//!   +------------------+------------------+---------------------+
//!                           ^
//!                           |
//!                           +-- threaded on the free ring
//! ```
//!
//! Releasing the trailing block hands its memory back to the OS once it is
//! big enough to be worth it; everything else is recycled through the free
//! ring, coalescing with an adjacent free neighbor on the way in. Which free
//! block satisfies a request is decided by a [`Placement`] rule chosen when
//! the heap is built: first, best or worst fit.
//!
//! All state lives in a [`Heap`] value parameterized by a [`Segment`], the
//! growth primitive. [`ProgramBreak`] is the real thing over `sbrk`;
//! [`FixedSegment`] is an isolated span for tests, so any number of
//! independent heaps can coexist in one process.
//!
//! Single-threaded by design: operations take `&mut self` and there is no
//! internal locking. Wrap the heap in a lock if you ever need to share it.

use std::ptr::NonNull;

mod align;
mod allocator;
mod block;
mod counters;
mod freelist;
mod segment;

/// Non-null pointer to `T`, or nothing. We use this instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the
/// `None` case, which is exactly the "no allocation" outcome the public
/// operations hand back.
pub type Pointer<T> = Option<NonNull<T>>;

pub use align::align;
pub use allocator::{Heap, TRIM_THRESHOLD};
pub use counters::{Counter, Counters};
pub use freelist::Placement;
#[cfg(all(unix, not(miri)))]
pub use segment::ProgramBreak;
pub use segment::{FixedSegment, Segment};
