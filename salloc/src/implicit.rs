//! Implicit free list allocator.
//!
//! The baseline design: no free lists at all, allocation walks every block from the start of the
//! heap and takes the first free one that fits. It shares the boundary tags, the arena and the
//! eager coalescing of [`SegregatedAllocator`](crate::SegregatedAllocator), which makes it a
//! useful reference when comparing placement cost and utilisation.
use core::fmt::Debug;

use crate::arena::{Arena, HeapStats};
use crate::block::{self, Block, CHUNK_SIZE, DWORD_SIZE, HeapPtr, Tag, WORD_SIZE};
use crate::check;
use crate::error::{AllocError, HeapCheckError};
use crate::memory::{MemRegion, MemorySource};
use crate::mut_alloc::HeapAllocator;

/// Without links, a free block only needs its two tags and one double word of payload.
pub const IMPLICIT_MIN_BLOCK: usize = 2 * DWORD_SIZE;

/// First-fit allocator over the implicit block chain.
pub struct ImplicitAllocator<S: MemorySource = MemRegion> {
    arena: Arena<S>,
    allocation_balance: isize,
}

impl<S: MemorySource> ImplicitAllocator<S> {
    /// Lays out the sentinels in `source` and grows the heap by one chunk.
    pub fn init(source: S) -> Result<Self, AllocError> {
        let mut this = Self {
            arena: Arena::new(source)?,
            allocation_balance: 0,
        };
        this.extend(CHUNK_SIZE / WORD_SIZE)?;
        this.condition_check();
        Ok(this)
    }

    /// Grows the heap by `words` words and returns the resulting free block at its end.
    pub fn extend(&mut self, words: usize) -> Result<Block, AllocError> {
        let size = (words + words % 2) * WORD_SIZE;
        let old_brk = self.arena.grow(size)?;

        let block = Block::new(old_brk - WORD_SIZE, size, true);
        self.arena.write_block(&block);
        self.arena.set_tag(block.end(), Tag::EPILOGUE);
        Ok(self.coalesce(block))
    }

    #[must_use = "Returned pointer must be released with release"]
    /// Allocates at least `size` bytes from the first free block large enough.
    pub fn allocate(&mut self, size: usize) -> Result<HeapPtr, AllocError> {
        let adjusted = block::adjust_request(size, IMPLICIT_MIN_BLOCK)
            .ok_or(AllocError::InvalidRequest { size })?;

        let fit = self
            .arena
            .blocks()
            .find(|block| block.is_free && block.size >= adjusted);
        let block = match fit {
            Some(block) => block,
            None => self.extend(adjusted.max(CHUNK_SIZE) / WORD_SIZE)?,
        };
        let block = self.place(block, adjusted);

        self.allocation_balance += 1;
        atrace!("Allocated {:?} for {} bytes", block, size);
        self.condition_check();
        Ok(HeapPtr::of_block(&block))
    }

    fn place(&mut self, mut block: Block, size: usize) -> Block {
        block.is_free = false;
        let rest = block.split(size, IMPLICIT_MIN_BLOCK);
        self.arena.write_block(&block);
        if let Some(rest) = rest {
            self.arena.write_block(&rest);
        }
        block
    }

    /// Releases the allocation at `ptr`. `None` is ignored.
    pub fn release(&mut self, ptr: impl Into<Option<HeapPtr>>) {
        let Some(ptr) = ptr.into() else {
            return;
        };
        let block = self.arena.block_of(ptr);
        debug_assert!(!block.is_free, "Double free of {:?}", ptr);

        self.coalesce(Block {
            is_free: true,
            ..block
        });
        self.allocation_balance -= 1;
        self.condition_check();
    }

    fn coalesce(&mut self, block: Block) -> Block {
        let prev = self.arena.prev_block(block.addr);
        let next = self.arena.next_block(&block);

        let mut merged = block;
        if prev.is_free {
            merged = prev.merge(&merged);
        }
        if next.is_free {
            merged = merged.merge(&next);
        }
        self.arena.write_block(&merged);
        merged
    }

    /// Conventional reallocation: the new block is sized for `size` alone, so it may shrink, and
    /// `min(old usable size, size)` bytes are carried over.
    pub fn reallocate(
        &mut self,
        ptr: Option<HeapPtr>,
        size: usize,
    ) -> Result<Option<HeapPtr>, AllocError> {
        if size == 0 {
            self.release(ptr);
            return Ok(None);
        }
        let Some(old) = ptr else {
            return self.allocate(size).map(Some);
        };

        let new = self.allocate(size)?;
        let len = self.usable_size(old).min(size);
        self.arena.copy_payload(old, new, len);
        self.release(old);
        Ok(Some(new))
    }

    #[must_use = "Returned pointer must be released with release"]
    /// Allocates `count * elem_size` zeroed bytes.
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Result<HeapPtr, AllocError> {
        let bytes = count
            .checked_mul(elem_size)
            .ok_or(AllocError::SizeOverflow { count, elem_size })?;
        let ptr = self.allocate(bytes)?;
        self.payload_mut(ptr)[..bytes].fill(0);
        Ok(ptr)
    }

    /// Bytes usable at `ptr`.
    pub fn usable_size(&self, ptr: HeapPtr) -> usize {
        self.arena.block_of(ptr).usable_size()
    }

    /// The usable bytes of the allocation at `ptr`.
    pub fn payload(&self, ptr: HeapPtr) -> &[u8] {
        self.arena.payload(&self.arena.block_of(ptr))
    }

    /// The usable bytes of the allocation at `ptr`, mutably.
    pub fn payload_mut(&mut self, ptr: HeapPtr) -> &mut [u8] {
        let block = self.arena.block_of(ptr);
        self.arena.payload_mut(&block)
    }

    /// The underlying block arena.
    pub fn arena(&self) -> &Arena<S> {
        &self.arena
    }

    /// Number of live allocations.
    pub fn allocation_balance(&self) -> isize {
        self.allocation_balance
    }

    /// Walks the block chain and returns the first inconsistency.
    pub fn check_heap(&self, verbose: bool) -> Result<(), HeapCheckError> {
        check::walk_heap(&self.arena, IMPLICIT_MIN_BLOCK, verbose).map(drop)
    }

    #[track_caller]
    fn condition_check(&self) {
        if crate::checking_enabled() {
            if let Err(err) = self.check_heap(false) {
                aerror!("Heap check failed: {}", err);
                panic!("Heap check failed: {err}");
            }
        }
    }
}

impl<S: MemorySource> HeapAllocator for ImplicitAllocator<S> {
    fn allocate(&mut self, size: usize) -> Result<HeapPtr, AllocError> {
        ImplicitAllocator::allocate(self, size)
    }

    fn release(&mut self, ptr: Option<HeapPtr>) {
        ImplicitAllocator::release(self, ptr)
    }

    fn reallocate(
        &mut self,
        ptr: Option<HeapPtr>,
        size: usize,
    ) -> Result<Option<HeapPtr>, AllocError> {
        ImplicitAllocator::reallocate(self, ptr, size)
    }

    fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Result<HeapPtr, AllocError> {
        ImplicitAllocator::zero_allocate(self, count, elem_size)
    }

    fn usable_size(&self, ptr: HeapPtr) -> usize {
        ImplicitAllocator::usable_size(self, ptr)
    }

    fn payload(&self, ptr: HeapPtr) -> &[u8] {
        ImplicitAllocator::payload(self, ptr)
    }

    fn payload_mut(&mut self, ptr: HeapPtr) -> &mut [u8] {
        ImplicitAllocator::payload_mut(self, ptr)
    }

    fn check_heap(&self, verbose: bool) -> Result<(), HeapCheckError> {
        ImplicitAllocator::check_heap(self, verbose)
    }

    fn stats(&self) -> HeapStats {
        self.arena.stats()
    }

    fn base_ptr(&mut self) -> *mut u8 {
        self.arena.source_mut().base_ptr()
    }
}

impl<S: MemorySource> Debug for ImplicitAllocator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImplicitAllocator")
            .field("arena", &self.arena)
            .field("allocation_balance", &self.allocation_balance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SENTINEL_OVERHEAD;
    use crate::test_common::{pattern, region};

    fn get_allocator(size: Option<usize>) -> ImplicitAllocator<MemRegion> {
        ImplicitAllocator::init(region(size)).expect("Failed to initialize heap")
    }

    #[test]
    fn test_init() {
        let allocator = get_allocator(None);
        assert_eq!(allocator.arena.extent(), SENTINEL_OVERHEAD + CHUNK_SIZE);
        assert_eq!(allocator.arena.blocks().count(), 1);
        allocator.check_heap(true).unwrap();
    }

    #[test]
    fn test_small_blocks() {
        let mut allocator = get_allocator(None);
        let ptr = allocator.allocate(8).unwrap();
        assert_eq!(allocator.arena.block_of(ptr).size, IMPLICIT_MIN_BLOCK);
        assert!(ptr.is_aligned());
    }

    #[test]
    fn test_first_fit_from_heap_start() {
        let mut allocator = get_allocator(None);

        let a = allocator.allocate(100).unwrap();
        let _g = allocator.allocate(16).unwrap();
        let b = allocator.allocate(100).unwrap();
        let _g2 = allocator.allocate(16).unwrap();
        allocator.release(b);
        allocator.release(a);

        // No LIFO here: the lowest fitting block wins.
        let ptr = allocator.allocate(50).unwrap();
        assert_eq!(ptr, a);
    }

    #[test]
    fn test_coalesce_and_growth() {
        let mut allocator = get_allocator(None);
        let extent = allocator.arena.extent();

        let ptrs = [
            allocator.allocate(2000).unwrap(),
            allocator.allocate(2000).unwrap(),
            allocator.allocate(2000).unwrap(),
        ];
        assert_eq!(allocator.arena.extent(), extent + CHUNK_SIZE);

        allocator.release(ptrs[1]);
        allocator.release(ptrs[0]);
        allocator.release(ptrs[2]);
        let stats = allocator.arena.stats();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.free_bytes + SENTINEL_OVERHEAD, stats.extent);
    }

    #[test]
    fn test_reallocate_can_shrink() {
        let mut allocator = get_allocator(None);

        let ptr = allocator.allocate(200).unwrap();
        for (i, byte) in allocator.payload_mut(ptr).iter_mut().enumerate() {
            *byte = pattern(5, i);
        }

        let new = allocator.reallocate(Some(ptr), 24).unwrap().unwrap();
        assert_eq!(allocator.usable_size(new), 24);
        for (i, byte) in allocator.payload(new).iter().enumerate() {
            assert_eq!(*byte, pattern(5, i));
        }
        assert_eq!(allocator.reallocate(Some(new), 0), Ok(None));
        assert_eq!(allocator.allocation_balance(), 0);
    }

    #[test]
    fn test_zero_allocate() {
        let mut allocator = get_allocator(None);
        let dirty = allocator.allocate(64).unwrap();
        allocator.payload_mut(dirty).fill(0xFF);
        allocator.release(dirty);

        let ptr = allocator.zero_allocate(8, 8).unwrap();
        assert!(allocator.payload(ptr)[..64].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_out_of_memory() {
        let mut allocator = get_allocator(Some(8192));
        assert!(matches!(
            allocator.allocate(1 << 16),
            Err(AllocError::OutOfMemory { .. })
        ));
        assert_eq!(allocator.allocate(0), Err(AllocError::InvalidRequest { size: 0 }));
        allocator.allocate(100).unwrap();
    }
}
