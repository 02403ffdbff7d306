use std::ops::{Index, IndexMut};

/// Named running totals maintained by the allocator engine. The engine only
/// ever writes them; reading and reporting is the caller's business, see
/// [`crate::Heap::counters`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    /// Total bytes currently obtained from the heap primitive, headers
    /// included. Grows with the break and shrinks back on release.
    HeapSize,
    /// Blocks currently tracked, free or allocated.
    Blocks,
    /// Times the break was moved forward.
    Grows,
    /// Times the break was moved back.
    Shrinks,
    /// Successful free list searches.
    Reuses,
    /// Calls to [`crate::Heap::allocate`] that produced a block.
    Allocs,
    /// Calls to [`crate::Heap::release`] with a real pointer.
    Frees,
    /// Calls to [`crate::Heap::zero_allocate`].
    ZeroAllocs,
    /// Calls to [`crate::Heap::resize`].
    Resizes,
    /// Adjacent free blocks absorbed during coalescing.
    Merges,
    /// Blocks carved in two to fit a request.
    Splits,
    /// Total bytes clients have asked for, before alignment.
    Requested,
}

/// Number of [`Counter`] variants. Keep in sync with the enum.
const COUNTERS: usize = 12;

/// Flat array of totals indexed by [`Counter`]. All zero until the engine
/// starts working.
#[derive(Clone, Copy, Debug, Default)]
pub struct Counters([u64; COUNTERS]);

impl Counters {
    pub const fn new() -> Self {
        Self([0; COUNTERS])
    }
}

impl Index<Counter> for Counters {
    type Output = u64;

    #[inline]
    fn index(&self, counter: Counter) -> &u64 {
        &self.0[counter as usize]
    }
}

impl IndexMut<Counter> for Counters {
    #[inline]
    fn index_mut(&mut self, counter: Counter) -> &mut u64 {
        &mut self.0[counter as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_index_by_name() {
        let mut counters = Counters::new();
        assert_eq!(counters[Counter::HeapSize], 0);
        assert_eq!(counters[Counter::Requested], 0);

        counters[Counter::Allocs] += 1;
        counters[Counter::Requested] += 128;
        counters[Counter::Allocs] += 1;

        assert_eq!(counters[Counter::Allocs], 2);
        assert_eq!(counters[Counter::Requested], 128);
        assert_eq!(counters[Counter::Frees], 0);
    }

    #[test]
    fn counters_can_decrease() {
        let mut counters = Counters::new();
        counters[Counter::HeapSize] += 4096;
        counters[Counter::HeapSize] -= 1024;
        assert_eq!(counters[Counter::HeapSize], 3072);
    }
}
