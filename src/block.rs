use std::{mem, ptr::NonNull};

use crate::{
    align::ALIGNMENT,
    counters::{Counter, Counters},
};

/// Block header size in bytes. See [`Block`].
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<Block>();

/// Smallest capacity worth carving out in a split. A remainder that cannot
/// hold at least one aligned word after its own header stays with the
/// original block as slack instead.
pub(crate) const MIN_CAPACITY: usize = ALIGNMENT;

/// Every block is a header immediately followed by the client's bytes, all of
/// it living inside the one contiguous heap span. Here's how it looks like in
/// memory:
///
/// ```text
///                 +----------------------------+
/// header offset   | capacity                   |  <---+
///                 +----------------------------+      |
///                 | size                       |      |
///                 +----------------------------+      | Block
///                 | prev link                  |      |
///                 +----------------------------+      |
///                 | next link                  |  <---+
///                 +----------------------------+
/// content offset  |       Block content        |  <---+
///                 |            ...             |      | capacity bytes, the
///                 |            ...             |      | address the client
///                 |            ...             |  <---+ gets and gives back.
///                 +----------------------------+
/// ```
///
/// `capacity` is the aligned usable byte count, `size` is what the client
/// actually asked for (and is meaningless while the block sits in the free
/// list). The two links make the header double as a free list node: either
/// both point back at the block itself (isolated, currently allocated or in
/// transit) or they place the block inside the free ring, see
/// [`crate::freelist`].
///
/// Nothing in here is a raw address. Blocks refer to each other by their
/// header's byte offset from the segment base, which keeps adjacency checks
/// as plain arithmetic and lets checked builds validate a handle before
/// anything is dereferenced.
#[repr(C)]
pub(crate) struct Block {
    /// Usable bytes after the header. Always aligned, always >= `size`.
    pub capacity: usize,
    /// Bytes requested by the current client allocation.
    pub size: usize,
    /// Ring predecessor, or self when isolated.
    pub prev: Link,
    /// Ring successor, or self when isolated.
    pub next: Link,
}

/// One hop in the free ring: the header offset of a neighboring block, or
/// [`Link::SENTINEL`] for the anchor that closes the ring. The anchor lives
/// outside the heap span (see [`crate::freelist::FreeList`]), so the sentinel
/// value is an offset no header can ever occupy and can't collide with a
/// real block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Link(usize);

impl Link {
    pub const SENTINEL: Link = Link(usize::MAX);

    /// The block this link points at, or `None` for the ring anchor.
    #[inline]
    pub fn block(self) -> Option<BlockRef> {
        if self == Self::SENTINEL {
            None
        } else {
            Some(BlockRef(self.0))
        }
    }
}

/// Handle to a block: the byte offset of its header from the segment base.
/// Offsets stay valid when nothing else about the heap changes, unlike
/// addresses they survive being reasoned about, compared and range-checked
/// without ever touching memory.
#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub(crate) struct BlockRef(pub(crate) usize);

impl BlockRef {
    /// Offset of the header.
    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }

    /// Offset of the first content byte.
    #[inline]
    pub fn data_offset(self) -> usize {
        self.0 + BLOCK_HEADER_SIZE
    }

    /// This handle as a ring link.
    #[inline]
    pub fn link(self) -> Link {
        Link(self.0)
    }
}

impl Block {
    /// Full byte span the block occupies: header plus capacity.
    #[inline]
    pub fn footprint(&self) -> usize {
        BLOCK_HEADER_SIZE + self.capacity
    }

    /// Offset one past the last content byte of the block at `at`.
    #[inline]
    pub fn end_offset(&self, at: BlockRef) -> usize {
        at.data_offset() + self.capacity
    }

    /// Whether the block is detached from any ring.
    #[inline]
    pub fn is_isolated(&self, at: BlockRef) -> bool {
        self.prev == at.link() && self.next == at.link()
    }

    /// Makes the links self-referential. Only valid right after the block
    /// has been unlinked or freshly written, see [`crate::freelist`].
    #[inline]
    pub fn isolate(&mut self, at: BlockRef) {
        self.prev = at.link();
        self.next = at.link();
    }
}

/// Resolves a handle to its header.
///
/// # Safety
///
/// `at` must be the offset of a live header within the segment starting at
/// `base`. The engine only creates handles from its own grows and splits, so
/// this holds as long as clients hand back pointers they got from us.
#[inline]
pub(crate) unsafe fn block_at(base: NonNull<u8>, at: BlockRef) -> NonNull<Block> {
    debug_assert!(at.0 % ALIGNMENT == 0, "misaligned block handle {:?}", at);
    NonNull::new_unchecked(base.as_ptr().add(at.0)).cast()
}

/// Recovers the handle owned by a client data pointer. Exact and unchecked
/// beyond debug assertions: a pointer that did not come out of this allocator
/// is undefined behavior, same contract as the API being replaced.
#[inline]
pub(crate) unsafe fn block_from_data(base: NonNull<u8>, data: NonNull<u8>) -> BlockRef {
    let address = data.as_ptr() as usize;
    debug_assert!(
        address >= base.as_ptr() as usize + BLOCK_HEADER_SIZE,
        "pointer below the heap span"
    );

    let at = BlockRef(address - base.as_ptr() as usize - BLOCK_HEADER_SIZE);
    debug_assert!(at.0 % ALIGNMENT == 0, "pointer not produced by this heap");

    at
}

/// Attempts to absorb `src` into `dst`. Succeeds only when `src`'s header
/// begins exactly where `dst`'s content ends, in which case `dst` grows by
/// `src`'s whole footprint and `src` ceases to exist; it must not be
/// referenced again. Ring membership is untouched either way; relinking is
/// the free list's job, which is the only caller that knows positions.
///
/// # Safety
///
/// Both handles must resolve to live headers under `base`.
pub(crate) unsafe fn merge(
    base: NonNull<u8>,
    dst: BlockRef,
    src: BlockRef,
    counters: &mut Counters,
) -> bool {
    let mut dst_block = block_at(base, dst);

    if dst_block.as_ref().end_offset(dst) != src.offset() {
        return false;
    }

    let absorbed = block_at(base, src).as_ref().footprint();
    dst_block.as_mut().capacity += absorbed;

    counters[Counter::Merges] += 1;
    counters[Counter::Blocks] -= 1;

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{FixedSegment, Segment};

    /// Writes an isolated free block header at `offset` and returns its
    /// handle. The segment break must already cover the footprint.
    unsafe fn put_block(base: NonNull<u8>, offset: usize, capacity: usize) -> BlockRef {
        let at = BlockRef(offset);
        block_at(base, at).as_ptr().write(Block {
            capacity,
            size: capacity,
            prev: at.link(),
            next: at.link(),
        });
        at
    }

    #[test]
    fn geometry() {
        let at = BlockRef(BLOCK_HEADER_SIZE * 3);
        assert_eq!(at.data_offset(), BLOCK_HEADER_SIZE * 4);

        let block = Block {
            capacity: 64,
            size: 40,
            prev: at.link(),
            next: at.link(),
        };

        assert_eq!(block.footprint(), BLOCK_HEADER_SIZE + 64);
        assert_eq!(block.end_offset(at), BLOCK_HEADER_SIZE * 4 + 64);
        assert!(block.is_isolated(at));
    }

    #[test]
    fn sentinel_is_not_a_block() {
        assert_eq!(Link::SENTINEL.block(), None);
        assert_eq!(BlockRef(0).link().block(), Some(BlockRef(0)));
    }

    #[test]
    fn merge_requires_exact_adjacency() {
        let mut segment = FixedSegment::with_capacity(4096);
        let mut counters = Counters::new();
        let base = segment.base();

        unsafe {
            segment.extend(4096).unwrap();

            // Two adjacent blocks and a third one a gap away.
            let first = put_block(base, 0, 64);
            let second = put_block(base, BLOCK_HEADER_SIZE + 64, 32);
            let far = put_block(base, 1024, 32);

            // Not adjacent in either direction.
            assert!(!merge(base, first, far, &mut counters));
            assert!(!merge(base, second, first, &mut counters));
            assert_eq!(counters[Counter::Merges], 0);

            counters[Counter::Blocks] = 3;
            assert!(merge(base, first, second, &mut counters));

            // First now spans its old capacity plus second's whole footprint.
            let merged = block_at(base, first).as_ref();
            assert_eq!(merged.capacity, 64 + BLOCK_HEADER_SIZE + 32);
            assert_eq!(merged.end_offset(first), second.offset() + BLOCK_HEADER_SIZE + 32);
            assert_eq!(counters[Counter::Merges], 1);
            assert_eq!(counters[Counter::Blocks], 2);

            // And it is now adjacent to nothing, the far block still isn't.
            assert!(!merge(base, first, far, &mut counters));
        }
    }

    #[test]
    fn data_pointer_round_trip() {
        let mut segment = FixedSegment::with_capacity(1024);
        let base = segment.base();

        unsafe {
            segment.extend(1024).unwrap();
            let at = put_block(base, 128, 64);

            let data = NonNull::new_unchecked(base.as_ptr().add(at.data_offset()));
            assert_eq!(block_from_data(base, data), at);
        }
    }
}
