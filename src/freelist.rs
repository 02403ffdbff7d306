use std::ptr::NonNull;

use crate::{
    block::{self, BlockRef, Link},
    counters::{Counter, Counters},
};

/// Rule for choosing which free block satisfies a request. Picked once when
/// the heap is built and fixed for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// First block in ring order with sufficient capacity. Cheapest scan,
    /// biased toward blocks near the ring head.
    FirstFit,
    /// Qualifying block with the smallest capacity, earliest wins ties.
    /// Minimizes the leftover per allocation at the cost of a full scan.
    BestFit,
    /// Qualifying block with the largest capacity, earliest wins ties.
    /// Leaves the biggest possible remainder for future large requests.
    WorstFit,
}

/// The free list: one circular doubly-linked ring threaded through the
/// headers of currently unused blocks, anchored by this struct.
///
/// ```text
///            +--------------------------------------------------+
///            |                                                  |
///            |   +--------+     +-------+     +-------+         |
///            +-> | anchor | <-> | Free  | <-> | Free  | <-> ... +
///                +--------+     +-------+     +-------+
///                 (FreeList      (in-span      (in-span
///                  struct,        header)       header)
///                  off-span)
/// ```
///
/// The anchor is this struct itself, living in the [`crate::Heap`] rather
/// than in the heap span. It has no capacity or size a search could ever
/// match, and ring links refer to it with [`Link::SENTINEL`], an offset no
/// real header can occupy. An empty ring is the anchor linked to itself,
/// which is what [`FreeList::new`] builds.
pub(crate) struct FreeList {
    /// First free block, or [`Link::SENTINEL`] when the ring is empty.
    next: Link,
    /// Last free block, or [`Link::SENTINEL`] when the ring is empty.
    prev: Link,
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            next: Link::SENTINEL,
            prev: Link::SENTINEL,
        }
    }

    /// Scans the ring for a block with `capacity >= size` using the given
    /// placement rule. A hit counts as a reuse but stays in the ring, the
    /// caller decides when to detach it.
    ///
    /// # Safety
    ///
    /// Every link in the ring must resolve to a live header under `base`.
    pub(crate) unsafe fn search(
        &self,
        base: NonNull<u8>,
        size: usize,
        placement: Placement,
        counters: &mut Counters,
    ) -> Option<BlockRef> {
        let found = match placement {
            Placement::FirstFit => self.search_first(base, size),
            Placement::BestFit => self.search_best(base, size),
            Placement::WorstFit => self.search_worst(base, size),
        };

        if found.is_some() {
            counters[Counter::Reuses] += 1;
        }

        found
    }

    unsafe fn search_first(&self, base: NonNull<u8>, size: usize) -> Option<BlockRef> {
        let mut cursor = self.next;

        while let Some(at) = cursor.block() {
            let current = block::block_at(base, at);
            if current.as_ref().capacity >= size {
                return Some(at);
            }
            cursor = current.as_ref().next;
        }

        None
    }

    unsafe fn search_best(&self, base: NonNull<u8>, size: usize) -> Option<BlockRef> {
        let mut candidate: Option<(BlockRef, usize)> = None;
        let mut cursor = self.next;

        while let Some(at) = cursor.block() {
            let current = block::block_at(base, at);
            let capacity = current.as_ref().capacity;

            // Strict comparison keeps the earliest block on ties.
            if capacity >= size && candidate.map_or(true, |(_, best)| capacity < best) {
                candidate = Some((at, capacity));
            }

            cursor = current.as_ref().next;
        }

        candidate.map(|(at, _)| at)
    }

    unsafe fn search_worst(&self, base: NonNull<u8>, size: usize) -> Option<BlockRef> {
        let mut candidate: Option<(BlockRef, usize)> = None;
        let mut cursor = self.next;

        while let Some(at) = cursor.block() {
            let current = block::block_at(base, at);
            let capacity = current.as_ref().capacity;

            if capacity >= size && candidate.map_or(true, |(_, worst)| capacity > worst) {
                candidate = Some((at, capacity));
            }

            cursor = current.as_ref().next;
        }

        candidate.map(|(at, _)| at)
    }

    /// Returns an isolated block to circulation, coalescing with at most one
    /// address-adjacent free block. The ring is walked in order trying, for
    /// each member, first to absorb the incoming block into the member and
    /// then the member into the incoming block; the first merge that takes
    /// ends the walk. When nothing merges the block is appended at the
    /// tail, just before the anchor.
    ///
    /// # Safety
    ///
    /// `at` must be a live isolated header; the ring must be valid.
    pub(crate) unsafe fn insert(
        &mut self,
        base: NonNull<u8>,
        at: BlockRef,
        counters: &mut Counters,
    ) {
        debug_assert!(
            block::block_at(base, at).as_ref().is_isolated(at),
            "inserting a block that is still linked somewhere"
        );

        let mut cursor = self.next;

        while let Some(dst) = cursor.block() {
            // Read the successor before merging: a successful merge in the
            // second direction takes dst off the ring.
            let next = block::block_at(base, dst).as_ref().next;

            if block::merge(base, dst, at, counters) {
                // dst absorbed the incoming block and already sits in the
                // ring, nothing left to link.
                return;
            }

            if block::merge(base, at, dst, counters) {
                // The incoming block absorbed dst, so it inherits dst's ring
                // position.
                self.replace(base, dst, at);
                return;
            }

            cursor = next;
        }

        self.push_tail(base, at);
    }

    /// Puts `at` into the ring position `dst` occupied. `dst`'s header is
    /// gone after a merge, but its links are still readable and its
    /// neighbors still point at it.
    unsafe fn replace(&mut self, base: NonNull<u8>, dst: BlockRef, at: BlockRef) {
        let (prev, next) = {
            let old = block::block_at(base, dst).as_ref();
            (old.prev, old.next)
        };

        let mut taken = block::block_at(base, at);
        taken.as_mut().prev = prev;
        taken.as_mut().next = next;

        match prev.block() {
            Some(p) => block::block_at(base, p).as_mut().next = at.link(),
            None => self.next = at.link(),
        }
        match next.block() {
            Some(n) => block::block_at(base, n).as_mut().prev = at.link(),
            None => self.prev = at.link(),
        }
    }

    /// Appends `at` right before the anchor, preserving ring validity.
    unsafe fn push_tail(&mut self, base: NonNull<u8>, at: BlockRef) {
        let mut tail = block::block_at(base, at);
        tail.as_mut().prev = self.prev;
        tail.as_mut().next = Link::SENTINEL;

        match self.prev.block() {
            Some(old_tail) => block::block_at(base, old_tail).as_mut().next = at.link(),
            None => self.next = at.link(),
        }

        self.prev = at.link();
    }

    /// Links `new` into the ring right after the member `at`. This is how a
    /// split hands its remainder back: the carved-off tail takes the old
    /// block's successor position.
    ///
    /// # Safety
    ///
    /// `at` must be a ring member and `new` a live isolated header.
    pub(crate) unsafe fn insert_after(&mut self, base: NonNull<u8>, at: BlockRef, new: BlockRef) {
        let next = block::block_at(base, at).as_ref().next;

        let mut inserted = block::block_at(base, new);
        inserted.as_mut().prev = at.link();
        inserted.as_mut().next = next;

        match next.block() {
            Some(succ) => block::block_at(base, succ).as_mut().prev = new.link(),
            None => self.prev = new.link(),
        }

        block::block_at(base, at).as_mut().next = new.link();
    }

    /// Unlinks `at` from the ring and leaves it isolated. A block that is
    /// already isolated is left alone.
    ///
    /// # Safety
    ///
    /// `at` must be a live header that is either isolated or a ring member.
    pub(crate) unsafe fn detach(&mut self, base: NonNull<u8>, at: BlockRef) {
        let (prev, next) = {
            let current = block::block_at(base, at).as_ref();
            (current.prev, current.next)
        };

        if prev == at.link() && next == at.link() {
            return;
        }

        match prev.block() {
            Some(p) => block::block_at(base, p).as_mut().next = next,
            None => self.next = next,
        }
        match next.block() {
            Some(n) => block::block_at(base, n).as_mut().prev = prev,
            None => self.prev = prev,
        }

        block::block_at(base, at).as_mut().isolate(at);
    }

    /// Number of blocks in the ring, anchor excluded. Diagnostics only, this
    /// never runs on an allocation path.
    pub(crate) unsafe fn len(&self, base: NonNull<u8>) -> usize {
        let mut length = 0;
        let mut cursor = self.next;

        while let Some(at) = cursor.block() {
            length += 1;
            cursor = block::block_at(base, at).as_ref().next;
        }

        length
    }

    /// Ring members in forward order. Test support.
    #[cfg(test)]
    pub(crate) unsafe fn blocks_forward(&self, base: NonNull<u8>) -> Vec<BlockRef> {
        let mut blocks = Vec::new();
        let mut cursor = self.next;

        while let Some(at) = cursor.block() {
            blocks.push(at);
            cursor = block::block_at(base, at).as_ref().next;
        }

        blocks
    }

    /// Ring members walked through the `prev` links. Test support.
    #[cfg(test)]
    pub(crate) unsafe fn blocks_backward(&self, base: NonNull<u8>) -> Vec<BlockRef> {
        let mut blocks = Vec::new();
        let mut cursor = self.prev;

        while let Some(at) = cursor.block() {
            blocks.push(at);
            cursor = block::block_at(base, at).as_ref().prev;
        }

        blocks
    }
}
