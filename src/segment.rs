use std::ptr::NonNull;

use crate::align::ALIGNMENT;

/// Abstraction over the heap growth primitive. The engine only needs to move
/// a break pointer forward to obtain memory and backward to return it, it
/// doesn't care whether the bytes come from the real program break or from a
/// span carved out for a test.
///
/// ```text
///  base()                              base() + extend(0)
///    |                                     |
///    v                                     v
///    +-------------------------------------+ - - - - - - - - +
///    |          owned heap span            |   not ours yet  |
///    +-------------------------------------+ - - - - - - - - +
///    offset 0                            break
/// ```
///
/// All offsets handed out by [`Segment::extend`] are relative to [`Segment::base`],
/// which must stay stable for the whole lifetime of the segment. The engine
/// turns them back into addresses only at the last moment, see
/// [`crate::block`].
pub trait Segment {
    /// Address of offset 0. Stable for the segment's lifetime.
    fn base(&self) -> NonNull<u8>;

    /// Moves the break by `delta` bytes and returns the offset the break had
    /// before the call, or `None` if the underlying primitive refuses. A
    /// `delta` of 0 queries the current break without side effects.
    ///
    /// # Safety
    ///
    /// Shrinking below the last live block hands memory the caller still
    /// references back to the OS. The engine only ever shrinks by the
    /// footprint of a block it has already detached.
    unsafe fn extend(&mut self, delta: isize) -> Option<usize>;
}

/// The real program break, moved with `sbrk`. This is process-wide state, so
/// there must never be more than one of these alive, and nothing else in the
/// process may move the break while it is.
#[cfg(all(unix, not(miri)))]
pub struct ProgramBreak {
    base: NonNull<u8>,
}

#[cfg(all(unix, not(miri)))]
impl ProgramBreak {
    /// Captures the current break as offset 0 of the heap span.
    ///
    /// # Safety
    ///
    /// Caller must guarantee this is the only owner of the program break in
    /// the process.
    pub unsafe fn acquire() -> Option<Self> {
        match libc::sbrk(0) {
            brk if brk == usize::MAX as *mut libc::c_void => None,
            brk => Some(Self {
                base: NonNull::new_unchecked(brk.cast()),
            }),
        }
    }
}

#[cfg(all(unix, not(miri)))]
impl Segment for ProgramBreak {
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    unsafe fn extend(&mut self, delta: isize) -> Option<usize> {
        // sbrk returns the previous break on success and (void *) -1 on
        // failure, distinct from any address it would ever hand out.
        match libc::sbrk(delta as libc::intptr_t) {
            brk if brk == usize::MAX as *mut libc::c_void => None,
            brk => Some(brk as usize - self.base.as_ptr() as usize),
        }
    }
}

/// A fixed-capacity span with a soft break moved inside it. Backed by the
/// global allocator, so heaps built on it are fully isolated from each other
/// and from the process break. This is what tests (and Miri, which has no
/// FFI) run against, and it makes exhaustion deterministic: once the break
/// hits the capacity, [`Segment::extend`] fails like a real `sbrk` would.
pub struct FixedSegment {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
}

impl FixedSegment {
    pub fn with_capacity(capacity: usize) -> Self {
        let address = unsafe { std::alloc::alloc(Self::backing_layout(capacity)) };

        Self {
            base: NonNull::new(address).expect("could not back the fixed segment"),
            capacity,
            brk: 0,
        }
    }

    fn backing_layout(capacity: usize) -> std::alloc::Layout {
        std::alloc::Layout::from_size_align(capacity.max(1), ALIGNMENT).unwrap()
    }
}

impl Segment for FixedSegment {
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    unsafe fn extend(&mut self, delta: isize) -> Option<usize> {
        let previous = self.brk;

        if delta >= 0 {
            let brk = self.brk.checked_add(delta as usize)?;
            if brk > self.capacity {
                return None;
            }
            self.brk = brk;
        } else {
            self.brk = self.brk.checked_sub(delta.unsigned_abs())?;
        }

        Some(previous)
    }
}

impl Drop for FixedSegment {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.base.as_ptr(), Self::backing_layout(self.capacity)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_segment_moves_its_break() {
        let mut segment = FixedSegment::with_capacity(4096);

        unsafe {
            assert_eq!(segment.extend(0), Some(0));
            assert_eq!(segment.extend(128), Some(0));
            assert_eq!(segment.extend(64), Some(128));
            assert_eq!(segment.extend(0), Some(192));
            assert_eq!(segment.extend(-64), Some(192));
            assert_eq!(segment.extend(0), Some(128));
        }
    }

    #[test]
    fn fixed_segment_runs_out() {
        let mut segment = FixedSegment::with_capacity(256);

        unsafe {
            assert_eq!(segment.extend(256), Some(0));
            // Full. The next grow must fail and leave the break alone.
            assert_eq!(segment.extend(1), None);
            assert_eq!(segment.extend(0), Some(256));
            // Shrinking past offset 0 is refused as well.
            assert_eq!(segment.extend(-512), None);
            assert_eq!(segment.extend(0), Some(256));
        }
    }

    #[test]
    fn grown_memory_is_usable() {
        let mut segment = FixedSegment::with_capacity(1024);

        unsafe {
            let offset = segment.extend(64).unwrap();
            let address = segment.base().as_ptr().add(offset);
            for i in 0..64 {
                address.add(i).write(i as u8);
            }
            for i in 0..64 {
                assert_eq!(address.add(i).read(), i as u8);
            }
        }
    }
}
