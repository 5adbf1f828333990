//! The memory-extension primitive the heap grows into.
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::fmt::Debug;
use core::ops::Range;
use core::ptr::NonNull;

use crate::block::DWORD_SIZE;

/// Default capacity of a [`MemRegion`].
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// A region that grows monotonically at its break, in the manner of `sbrk(2)`.
///
/// Bytes below the break can be read and written by offset. Memory is never handed back.
///
/// Word accesses and copies must not create references spanning the region, so that raw pointers
/// derived from [`base_ptr`](MemorySource::base_ptr) into other parts of it stay usable.
pub trait MemorySource {
    /// Moves the break up by `incr` bytes and returns the old break.
    /// Returns `None`, leaving the region unchanged, if the region cannot grow that far.
    fn sbrk(&mut self, incr: usize) -> Option<usize>;
    /// The current break.
    fn brk(&self) -> usize;
    /// Reads the (possibly unaligned) word at `offset`.
    fn read_u32(&self, offset: usize) -> u32;
    /// Writes the (possibly unaligned) word at `offset`.
    fn write_u32(&mut self, offset: usize, value: u32);
    /// The bytes in `range`, which must lie below the break.
    fn slice(&self, range: Range<usize>) -> &[u8];
    /// The bytes in `range`, mutably.
    fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8];
    /// Copies `len` bytes from `src` to `dst`. The ranges may overlap.
    fn copy_within(&mut self, src: usize, dst: usize, len: usize);
    /// Address of offset zero. This must not move while the source is alive.
    fn base_ptr(&mut self) -> *mut u8;
}

/// A fixed-capacity, 8 byte aligned region with a movable break.
///
/// The region is one raw allocation that only this value frees, so pointers into it stay valid
/// for as long as the region lives.
pub struct MemRegion {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
}

// SAFETY: `MemRegion` uniquely owns its allocation, like a `Box<[u8]>`.
unsafe impl Send for MemRegion {}

impl MemRegion {
    /// Creates a region of [`DEFAULT_MAX_HEAP`] bytes.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HEAP)
    }

    /// Creates a zeroed region that can grow to `capacity` bytes (rounded up to a multiple of 8).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(DWORD_SIZE).next_multiple_of(DWORD_SIZE);
        let layout = Self::layout(capacity);
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Self {
            base,
            capacity,
            brk: 0,
        }
    }

    fn layout(capacity: usize) -> Layout {
        match Layout::from_size_align(capacity, DWORD_SIZE) {
            Ok(layout) => layout,
            Err(_) => panic!("region capacity overflow"),
        }
    }

    /// Bytes the region can grow to.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pointer to `offset`, after checking that `len` bytes from there lie below the break.
    #[track_caller]
    fn at(&self, offset: usize, len: usize) -> *mut u8 {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.brk),
            "access to {offset:#x}..+{len} past the break at {:#x}",
            self.brk
        );
        self.base.as_ptr().wrapping_add(offset)
    }
}

impl Default for MemRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemRegion {
    fn drop(&mut self) {
        // SAFETY: `base` came from `alloc_zeroed` with exactly this layout.
        unsafe { dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
    }
}

impl MemorySource for MemRegion {
    fn sbrk(&mut self, incr: usize) -> Option<usize> {
        let old = self.brk;
        let new = old.checked_add(incr)?;
        if new > self.capacity {
            return None;
        }
        self.brk = new;
        Some(old)
    }

    fn brk(&self) -> usize {
        self.brk
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let ptr = self.at(offset, size_of::<u32>());
        // SAFETY: `at` checked that the word lies inside the allocation.
        unsafe { ptr.cast::<u32>().read_unaligned() }
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        let ptr = self.at(offset, size_of::<u32>());
        // SAFETY: `at` checked that the word lies inside the allocation.
        unsafe { ptr.cast::<u32>().write_unaligned(value) }
    }

    fn slice(&self, range: Range<usize>) -> &[u8] {
        let len = range.end.saturating_sub(range.start);
        let ptr = self.at(range.start, len);
        // SAFETY: The range is inside the zero-initialised allocation and the borrow of `self`
        // keeps it from being written through this region meanwhile.
        unsafe { core::slice::from_raw_parts(ptr, len) }
    }

    fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        let len = range.end.saturating_sub(range.start);
        let ptr = self.at(range.start, len);
        // SAFETY: As for `slice`, with the exclusive borrow of `self`.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }

    fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        let from = self.at(src, len);
        let to = self.at(dst, len);
        // SAFETY: Both ranges were checked to lie inside the allocation; `copy` allows overlap.
        unsafe { core::ptr::copy(from, to, len) }
    }

    fn base_ptr(&mut self) -> *mut u8 {
        self.base.as_ptr()
    }
}

impl Debug for MemRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemRegion")
            .field("base", &self.base)
            .field("brk", &self.brk)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sbrk_returns_old_break() {
        let mut region = MemRegion::with_capacity(64);
        assert_eq!(region.sbrk(16), Some(0));
        assert_eq!(region.sbrk(8), Some(16));
        assert_eq!(region.brk(), 24);
        assert_eq!(region.slice(0..24).len(), 24);
    }

    #[test]
    fn test_sbrk_exhaustion_leaves_region() {
        let mut region = MemRegion::with_capacity(64);
        region.sbrk(60).unwrap();
        assert_eq!(region.sbrk(8), None);
        assert_eq!(region.brk(), 60);
        assert_eq!(region.sbrk(usize::MAX), None);
        assert_eq!(region.sbrk(4), Some(60));
    }

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(MemRegion::with_capacity(13).capacity(), 16);
        assert_eq!(MemRegion::with_capacity(0).capacity(), 8);
    }

    #[test]
    fn test_words_and_copies() {
        let mut region = MemRegion::with_capacity(64);
        region.sbrk(32).unwrap();
        assert_eq!(region.read_u32(3), 0);

        region.write_u32(3, 0xDEAD_BEEF);
        assert_eq!(region.read_u32(3), 0xDEAD_BEEF);

        region.slice_mut(8..12).copy_from_slice(&[1, 2, 3, 4]);
        region.copy_within(8, 10, 4);
        assert_eq!(region.slice(8..14), [1, 2, 1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "past the break")]
    fn test_access_past_break() {
        let mut region = MemRegion::with_capacity(64);
        region.sbrk(8).unwrap();
        region.read_u32(6);
    }

    #[test]
    fn test_base_is_aligned_and_stable() {
        let mut region = MemRegion::with_capacity(4096);
        let base = region.base_ptr();
        assert_eq!(base.addr() % 8, 0);
        region.sbrk(1024).unwrap();
        region.slice_mut(1000..1001)[0] = 0xAB;
        assert_eq!(region.base_ptr(), base);
        // SAFETY: Offset 1000 is below the break.
        assert_eq!(unsafe { *base.add(1000) }, 0xAB);
    }

    #[test]
    fn test_raw_pointer_survives_word_writes() {
        let mut region = MemRegion::with_capacity(256);
        region.sbrk(256).unwrap();

        let user = region.base_ptr().wrapping_add(128);
        // SAFETY: Offset 128 is inside the region, which outlives `user`.
        unsafe { user.write(7) };
        region.write_u32(0, 1);
        region.write_u32(200, 2);
        region.copy_within(0, 64, 4);
        // SAFETY: As above.
        assert_eq!(unsafe { user.read() }, 7);
    }
}
