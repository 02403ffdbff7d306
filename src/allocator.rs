use std::ptr::{self, NonNull};

use crate::{
    align::align,
    block::{self, Block, BlockRef, BLOCK_HEADER_SIZE, MIN_CAPACITY},
    counters::{Counter, Counters},
    freelist::{FreeList, Placement},
    segment::Segment,
    Pointer,
};

/// Minimum footprint, in bytes, worth handing back to the OS. A trailing
/// block below this stays in the free list instead of shrinking the break,
/// trading a little residency for not bouncing the break on every small
/// release.
pub const TRIM_THRESHOLD: usize = 1024;

/// One heap: a contiguous span grown and shrunk through a [`Segment`], the
/// free ring threaded through it, the placement policy and the counters.
/// This is the whole allocator context. Build as many as you want, they
/// share nothing.
///
/// Not thread safe and not trying to be: every operation takes `&mut self`
/// and callers that need concurrent access wrap the heap in their own lock.
///
/// # Examples
///
/// ```rust
/// use brkalloc::{FixedSegment, Heap, Placement};
///
/// let mut heap = Heap::with_segment(FixedSegment::with_capacity(4096), Placement::FirstFit);
///
/// let ptr = heap.allocate(64).unwrap();
///
/// unsafe {
///     ptr.as_ptr().write_bytes(7, 64);
///     assert_eq!(ptr.as_ptr().read(), 7);
///     heap.release(Some(ptr));
/// }
/// ```
pub struct Heap<S: Segment> {
    /// Where the bytes come from.
    segment: S,
    /// One past the last byte we own, as an offset from the segment base.
    /// Mirrors the primitive's break after every grow and shrink.
    brk: usize,
    /// Ring of reusable blocks.
    free: FreeList,
    /// Search rule, fixed at construction.
    placement: Placement,
    /// Instrumentation totals, write-only from in here.
    counters: Counters,
}

impl<S: Segment> Heap<S> {
    /// Builds a heap over `segment`. The segment must be fresh: its break at
    /// the base, no bytes owned yet.
    pub fn with_segment(mut segment: S, placement: Placement) -> Self {
        debug_assert_eq!(
            unsafe { segment.extend(0) },
            Some(0),
            "segment handed over with a non-empty span"
        );

        Self {
            segment,
            brk: 0,
            free: FreeList::new(),
            placement,
            counters: Counters::new(),
        }
    }

    /// Read view of the running totals.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Search rule this heap was built with.
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Current break offset: total bytes owned, headers included.
    pub fn break_offset(&self) -> usize {
        self.brk
    }

    /// Blocks currently sitting in the free ring. Diagnostics, not a hot
    /// path.
    pub fn free_list_len(&self) -> usize {
        unsafe { self.free.len(self.base()) }
    }

    #[inline]
    fn base(&self) -> NonNull<u8> {
        self.segment.base()
    }

    /// Allocates a brand-new block at the break. The returned block is
    /// isolated, sized `align(size)`, and not known to the free ring.
    /// `None` when the primitive refuses to grow.
    unsafe fn grow_block(&mut self, size: usize) -> Option<BlockRef> {
        let capacity = align(size);
        let length = BLOCK_HEADER_SIZE + capacity;

        let previous = self.segment.extend(length as isize)?;
        debug_assert_eq!(previous, self.brk, "the break moved under us");

        let at = BlockRef(previous);
        self.brk += length;

        block::block_at(self.base(), at).as_ptr().write(Block {
            capacity,
            size,
            prev: at.link(),
            next: at.link(),
        });

        self.counters[Counter::HeapSize] += length as u64;
        self.counters[Counter::Blocks] += 1;
        self.counters[Counter::Grows] += 1;

        Some(at)
    }

    /// Tries to return a block's memory to the OS. Only the block that ends
    /// exactly at the break qualifies, and only when its footprint clears
    /// [`TRIM_THRESHOLD`]. On failure the block is left exactly as it was
    /// and the caller still owns it.
    unsafe fn release_block(&mut self, at: BlockRef) -> bool {
        let header = block::block_at(self.base(), at);
        let footprint = header.as_ref().footprint();

        if header.as_ref().end_offset(at) != self.brk || footprint < TRIM_THRESHOLD {
            return false;
        }

        // Unlink before the memory goes away, not after.
        self.free.detach(self.base(), at);

        if self.segment.extend(-(footprint as isize)).is_none() {
            return false;
        }

        self.brk -= footprint;
        self.counters[Counter::Blocks] -= 1;
        self.counters[Counter::Shrinks] += 1;
        self.counters[Counter::HeapSize] -= footprint as u64;

        true
    }

    /// Shapes a ring member down to `size`, carving the surplus into a new
    /// free block linked right after it. When the surplus cannot hold a
    /// header plus [`MIN_CAPACITY`] the block keeps its capacity as slack
    /// and only `size` is updated.
    unsafe fn split_block(&mut self, at: BlockRef, size: usize) {
        let capacity = align(size);
        let mut header = block::block_at(self.base(), at);

        if header.as_ref().capacity >= capacity + BLOCK_HEADER_SIZE + MIN_CAPACITY {
            let leftover = header.as_ref().capacity - capacity - BLOCK_HEADER_SIZE;
            let rest = BlockRef(at.data_offset() + capacity);

            block::block_at(self.base(), rest).as_ptr().write(Block {
                capacity: leftover,
                size: leftover,
                prev: rest.link(),
                next: rest.link(),
            });
            self.free.insert_after(self.base(), at, rest);

            header.as_mut().capacity = capacity;

            self.counters[Counter::Splits] += 1;
            self.counters[Counter::Blocks] += 1;
        }

        header.as_mut().size = size;
    }

    /// Recovers the handle behind a client pointer, range-checking it in
    /// checked builds.
    unsafe fn checked_handle(&self, data: NonNull<u8>) -> BlockRef {
        let at = block::block_from_data(self.base(), data);
        debug_assert!(
            at.data_offset() <= self.brk,
            "pointer past the current break"
        );
        at
    }

    /// Hands out at least `size` usable bytes, reusing a free block when the
    /// placement rule finds one and growing the heap otherwise. A `size` of
    /// 0 is `None` without touching anything; `None` otherwise means the
    /// heap primitive is out of memory.
    pub fn allocate(&mut self, size: usize) -> Pointer<u8> {
        if size == 0 {
            return None;
        }

        unsafe {
            let base = self.base();

            let at = match self.free.search(base, size, self.placement, &mut self.counters) {
                Some(found) => {
                    self.split_block(found, size);
                    self.free.detach(base, found);
                    found
                }
                None => self.grow_block(size)?,
            };

            let header = block::block_at(base, at);
            debug_assert!(header.as_ref().capacity >= header.as_ref().size);
            debug_assert!(header.as_ref().is_isolated(at));

            self.counters[Counter::Allocs] += 1;
            self.counters[Counter::Requested] += size as u64;

            Some(NonNull::new_unchecked(base.as_ptr().add(at.data_offset())))
        }
    }

    /// Gives a block back. The trailing block past the trim threshold
    /// shrinks the heap; everything else goes into the free ring for reuse.
    /// `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must have come out of this heap's [`Heap::allocate`],
    /// [`Heap::zero_allocate`] or [`Heap::resize`] and not have been
    /// released since. Anything else is undefined behavior, same contract
    /// as `free`.
    pub unsafe fn release(&mut self, ptr: Pointer<u8>) {
        let Some(data) = ptr else { return };

        let base = self.base();
        let at = self.checked_handle(data);

        self.counters[Counter::Frees] += 1;

        if !self.release_block(at) {
            self.free.insert(base, at, &mut self.counters);
        }
    }

    /// Allocates `count * elem_size` bytes and zeroes them before the
    /// caller ever sees the region. `None` on overflow of the product or on
    /// exhaustion.
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Pointer<u8> {
        self.counters[Counter::ZeroAllocs] += 1;

        let total = count.checked_mul(elem_size)?;
        let data = self.allocate(total)?;

        unsafe { data.as_ptr().write_bytes(0, total) };

        Some(data)
    }

    /// Resizes an allocation. `None` as the pointer allocates fresh; a
    /// `new_size` of 0 releases and returns `None`. When the block's
    /// capacity already covers `new_size` the same pointer comes back with
    /// nothing moved. Otherwise the lesser of the old and new sizes' worth
    /// of bytes moves to a freshly allocated block and the old block
    /// is released. If that new allocation fails the original block is
    /// untouched and `None` returns.
    ///
    /// # Safety
    ///
    /// Same pointer contract as [`Heap::release`].
    pub unsafe fn resize(&mut self, ptr: Pointer<u8>, new_size: usize) -> Pointer<u8> {
        self.counters[Counter::Resizes] += 1;

        let Some(data) = ptr else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            self.release(Some(data));
            return None;
        }

        let at = self.checked_handle(data);
        let mut header = block::block_at(self.base(), at);

        if header.as_ref().capacity >= new_size {
            header.as_mut().size = new_size;
            return Some(data);
        }

        let old_size = header.as_ref().size;
        let new_data = self.allocate(new_size)?;

        ptr::copy_nonoverlapping(data.as_ptr(), new_data.as_ptr(), old_size.min(new_size));
        self.release(Some(data));

        Some(new_data)
    }
}

#[cfg(all(unix, not(miri)))]
impl Heap<crate::segment::ProgramBreak> {
    /// Builds the one heap a process gets over its real program break.
    ///
    /// # Safety
    ///
    /// Nothing else in the process may move the break for as long as the
    /// heap lives, including the libc allocator, so this is only sound in
    /// programs where that never runs or never uses `brk`.
    pub unsafe fn with_program_break(placement: Placement) -> Option<Self> {
        crate::segment::ProgramBreak::acquire().map(|segment| Self::with_segment(segment, placement))
    }
}
