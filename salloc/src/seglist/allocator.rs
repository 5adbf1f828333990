//! The segregated free-list allocator.
use core::fmt::Debug;

use crate::arena::{Arena, HeapStats};
use crate::block::{self, Block, CHUNK_SIZE, HeapPtr, MIN_BLOCK_SIZE, Tag, WORD_SIZE};
use crate::check;
use crate::error::{AllocError, HeapCheckError};
use crate::free_list::FreeLists;
use crate::memory::{MemRegion, MemorySource};
use crate::size_class::{self, NUM_SIZE_CLASSES};

/// A first-fit allocator over nine segregated free lists.
///
/// Free blocks are coalesced with their neighbours as soon as they are released or created by
/// heap growth, so no two free blocks are ever adjacent between operations.
pub struct SegregatedAllocator<S: MemorySource = MemRegion> {
    pub(crate) arena: Arena<S>,
    pub(crate) free_lists: FreeLists,
    pub(crate) allocation_balance: isize,
}

impl SegregatedAllocator<MemRegion> {
    /// An allocator over a fresh [`MemRegion`] of the default size.
    pub fn with_default_region() -> Result<Self, AllocError> {
        Self::init(MemRegion::new())
    }
}

impl<S: MemorySource> SegregatedAllocator<S> {
    /// Lays out the sentinels in `source` and grows the heap by one chunk.
    /// Fails only if `source` cannot provide the first chunk.
    pub fn init(source: S) -> Result<Self, AllocError> {
        let mut this = Self {
            arena: Arena::new(source)?,
            free_lists: FreeLists::new(),
            allocation_balance: 0,
        };
        this.extend(CHUNK_SIZE / WORD_SIZE)?;
        ainfo!("Heap initialized with {:#x} bytes", this.arena.extent());
        this.condition_check();
        Ok(this)
    }

    /// Grows the heap by `words` words (rounded up to an even count), turning the new space into a
    /// free block merged with a free block at the old end of the heap.
    pub fn extend(&mut self, words: usize) -> Result<Block, AllocError> {
        let words = words + words % 2;
        let size = words * WORD_SIZE;

        let old_brk = self.arena.grow(size)?;
        // The old epilogue becomes the header of the new block.
        let block = Block::new(old_brk - WORD_SIZE, size, true);
        self.arena.set_tag(block.end(), Tag::EPILOGUE);
        self.arena.write_block(&block);

        let block = self.coalesce(block);
        self.free_lists.insert(&mut self.arena, block);
        adebug!("Extended heap by {:#x} bytes, free block {:?}", size, block);
        Ok(block)
    }

    /// Allocates at least `size` bytes, 8 byte aligned, from the first fitting free block.
    /// The heap grows by at least one chunk when nothing fits.
    #[must_use = "Returned pointer must be released with release"]
    pub fn allocate(&mut self, size: usize) -> Result<HeapPtr, AllocError> {
        let adjusted =
            block::adjust_request(size, MIN_BLOCK_SIZE).ok_or(AllocError::InvalidRequest { size })?;

        let block = match self.find_fit(adjusted) {
            Some(block) => block,
            None => {
                self.extend(adjusted.max(CHUNK_SIZE) / WORD_SIZE)?;
                self.find_fit(adjusted)
                    .ok_or(AllocError::OutOfMemory { requested: adjusted })?
            }
        };
        self.free_lists.remove(&mut self.arena, block);
        let block = self.place(block, adjusted);

        self.allocation_balance += 1;
        atrace!("Allocated {:?} for {} bytes", block, size);
        self.condition_check();
        Ok(HeapPtr::of_block(&block))
    }

    /// First block of at least `size` bytes, searching from the class of `size` upwards.
    fn find_fit(&self, size: usize) -> Option<Block> {
        (size_class::index_for(size)..NUM_SIZE_CLASSES)
            .flat_map(|class| self.free_lists.iter(&self.arena, class))
            .find(|block| block.size >= size)
    }

    /// Marks the unlisted free `block` allocated, splitting off the tail when it can stand on its
    /// own as a free block.
    fn place(&mut self, mut block: Block, size: usize) -> Block {
        block.is_free = false;
        let rest = block.split(size, MIN_BLOCK_SIZE);
        self.arena.write_block(&block);
        if let Some(rest) = rest {
            self.free_lists.insert(&mut self.arena, rest);
        }
        block
    }

    /// Releases the allocation at `ptr`. `None` is ignored.
    ///
    /// `ptr` must have come from this allocator and must not have been released already.
    pub fn release(&mut self, ptr: impl Into<Option<HeapPtr>>) {
        let Some(ptr) = ptr.into() else {
            return;
        };
        let block = self.arena.block_of(ptr);
        debug_assert!(!block.is_free, "Double free of {:?}", ptr);

        let block = self.coalesce(Block {
            is_free: true,
            ..block
        });
        self.free_lists.insert(&mut self.arena, block);

        self.allocation_balance -= 1;
        atrace!("Released {:?} into {:?}", ptr, block);
        self.condition_check();
    }

    /// Merges the unlisted free `block` with free neighbours, unlinking them first, and writes the
    /// tags of the result.
    fn coalesce(&mut self, block: Block) -> Block {
        let prev = self.arena.prev_block(block.addr);
        let next = self.arena.next_block(&block);

        let merged = match (prev.is_free, next.is_free) {
            (false, false) => block,
            (false, true) => {
                self.free_lists.remove(&mut self.arena, next);
                block.merge(&next)
            }
            (true, false) => {
                self.free_lists.remove(&mut self.arena, prev);
                prev.merge(&block)
            }
            (true, true) => {
                self.free_lists.remove(&mut self.arena, prev);
                self.free_lists.remove(&mut self.arena, next);
                prev.merge(&block).merge(&next)
            }
        };
        self.arena.write_block(&merged);
        merged
    }

    /// Moves the allocation at `ptr` into a block of at least `size` bytes.
    ///
    /// A zero `size` releases `ptr` and returns `None`; a `None` pointer allocates. Blocks are
    /// never shrunk: the new block is at least as large as the old usable size, and the whole old
    /// payload is carried over. If the new allocation fails the old one is left untouched.
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

        let old_size = self.usable_size(old);
        let size = old_size.max(size);
        let new = self.allocate(size)?;

        self.arena.copy_payload(old, new, old_size.min(size));
        self.release(old);
        Ok(Some(new))
    }

    /// Allocates `count * elem_size` zeroed bytes.
    #[must_use = "Returned pointer must be released with release"]
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Result<HeapPtr, AllocError> {
        let bytes = count
            .checked_mul(elem_size)
            .ok_or(AllocError::SizeOverflow { count, elem_size })?;
        let ptr = self.allocate(bytes)?;
        self.payload_mut(ptr)[..bytes].fill(0);
        Ok(ptr)
    }

    /// Bytes usable at `ptr`, at least what was requested for it.
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

    /// Walks the block chain in address order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.arena.blocks()
    }

    /// Block counts and sizes of the current heap.
    pub fn stats(&self) -> HeapStats {
        self.arena.stats()
    }

    /// The underlying block arena.
    pub fn arena(&self) -> &Arena<S> {
        &self.arena
    }

    /// The free list heads.
    pub fn free_lists(&self) -> &FreeLists {
        &self.free_lists
    }

    /// Number of live allocations.
    pub fn allocation_balance(&self) -> isize {
        self.allocation_balance
    }

    /// Verifies every block and every free list, returning the first inconsistency found.
    /// With `verbose`, every block is logged along the way.
    pub fn check_heap(&self, verbose: bool) -> Result<(), HeapCheckError> {
        let census = check::walk_heap(&self.arena, MIN_BLOCK_SIZE, verbose)?;
        check::check_free_lists(&self.arena, &self.free_lists, &census)
    }

    /// Like [`check_heap`](Self::check_heap), but panics on the first inconsistency.
    #[track_caller]
    pub fn checkheap(&self, verbose: bool) {
        match self.check_heap(verbose) {
            Ok(()) => {
                if verbose {
                    ainfo!("Heap seems okay");
                }
            }
            Err(err) => {
                aerror!("Heap check failed: {}", err);
                panic!("Heap check failed: {err}");
            }
        }
    }

    #[track_caller]
    pub(crate) fn condition_check(&self) {
        if crate::checking_enabled() {
            self.checkheap(false);
        }
    }

    /// Prints a debug representation of the allocator.
    pub fn print_state(&self) {
        let stats = self.stats();
        ainfo!(
            "Extent: {:#x}, Blocks: {} ({} free), Balance: {}",
            stats.extent,
            stats.blocks,
            stats.free_blocks,
            self.allocation_balance,
        );
        for class in 0..NUM_SIZE_CLASSES {
            ainfo!(
                "Class {}: {} free blocks",
                class,
                self.free_lists.len(&self.arena, class)
            );
        }
    }
}

impl<S: MemorySource> Debug for SegregatedAllocator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegregatedAllocator")
            .field("arena", &self.arena)
            .field("free_lists", &self.free_lists)
            .field("allocation_balance", &self.allocation_balance)
            .finish()
    }
}
