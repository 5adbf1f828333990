//! The heap region: sentinels, tag access and the block chain.
use core::fmt::Debug;
use core::ops::Range;

use crate::block::{self, Block, DWORD_SIZE, HeapPtr, Tag, WORD_SIZE};
use crate::error::AllocError;
use crate::memory::MemorySource;

/// Bytes taken by the alignment pad, the prologue and the epilogue.
pub const SENTINEL_OVERHEAD: usize = 4 * WORD_SIZE;

/// A contiguous, append-only heap laid out as
/// `pad | prologue header | prologue footer | blocks... | epilogue`.
///
/// Free-list links are 32 bit offsets, so an arena never grows past 4 GiB.
pub struct Arena<S: MemorySource> {
    source: S,
    start: usize,
}

impl<S: MemorySource> Arena<S> {
    /// Takes the first four words of `source` for the pad and the sentinels.
    /// The current break of `source` must be double-word aligned.
    pub fn new(mut source: S) -> Result<Self, AllocError> {
        let start = source
            .sbrk(SENTINEL_OVERHEAD)
            .ok_or(AllocError::OutOfMemory {
                requested: SENTINEL_OVERHEAD,
            })?;
        debug_assert_eq!(start % DWORD_SIZE, 0, "memory source break is misaligned");

        let mut arena = Self { source, start };
        arena.set_word(start, 0);
        arena.set_tag(arena.prologue(), Tag::PROLOGUE);
        arena.set_tag(arena.prologue() + WORD_SIZE, Tag::PROLOGUE);
        arena.set_tag(arena.epilogue(), Tag::EPILOGUE);
        Ok(arena)
    }

    /// Offset of the prologue header.
    pub fn prologue(&self) -> usize {
        self.start + WORD_SIZE
    }

    /// Offset of the first real block (or of the epilogue while the heap is empty).
    pub fn heap_lo(&self) -> usize {
        self.start + 3 * WORD_SIZE
    }

    /// Offset of the epilogue header, always the last word of the region.
    pub fn epilogue(&self) -> usize {
        self.source.brk() - WORD_SIZE
    }

    /// Bytes owned by this arena, sentinels included.
    pub fn extent(&self) -> usize {
        self.source.brk() - self.start
    }

    /// Extends the region by `bytes` and returns the old break. The caller owns the new bytes and
    /// must write a fresh epilogue.
    pub fn grow(&mut self, bytes: usize) -> Result<usize, AllocError> {
        let err = AllocError::OutOfMemory { requested: bytes };
        if self
            .source
            .brk()
            .checked_add(bytes)
            .is_none_or(|end| end > u32::MAX as usize)
        {
            return Err(err);
        }
        let old = self.source.sbrk(bytes).ok_or(err)?;
        atrace!("Arena grew by {:#x} bytes to {:#x}", bytes, self.source.brk());
        Ok(old)
    }

    /// Reads the boundary tag at `offset`.
    pub fn tag(&self, offset: usize) -> Tag {
        bytemuck::cast(self.source.read_u32(offset))
    }

    /// Writes a boundary tag at `offset`.
    pub fn set_tag(&mut self, offset: usize, tag: Tag) {
        self.source.write_u32(offset, bytemuck::cast(tag));
    }

    /// Reads the raw word at `offset`, such as a free-list link.
    pub fn word(&self, offset: usize) -> u32 {
        self.source.read_u32(offset)
    }

    /// Writes the raw word at `offset`.
    pub fn set_word(&mut self, offset: usize, value: u32) {
        self.source.write_u32(offset, value);
    }

    /// Decodes the block whose header is at `header`.
    pub fn block_at(&self, header: usize) -> Block {
        let (size, allocated) = self.tag(header).decode();
        Block::new(header, size, !allocated)
    }

    /// Writes matching header and footer tags for `block`.
    pub fn write_block(&mut self, block: &Block) {
        let tag = block.tag();
        self.set_tag(block.addr, tag);
        self.set_tag(block::footer_of(block.addr, tag), tag);
    }

    /// The block physically after `block`; the epilogue decodes as an allocated block of size 0.
    pub fn next_block(&self, block: &Block) -> Block {
        self.block_at(block::next_header(block.addr, block.tag()))
    }

    /// The block physically before the header at `header`, found through its footer.
    pub fn prev_block(&self, header: usize) -> Block {
        let footer = self.tag(header - WORD_SIZE);
        let (size, allocated) = footer.decode();
        Block::new(block::prev_header(header, footer), size, !allocated)
    }

    /// Walks every block between the prologue and the epilogue.
    pub fn blocks(&self) -> Blocks<'_, S> {
        Blocks {
            arena: self,
            next: self.heap_lo(),
        }
    }

    /// The block that owns `ptr`.
    pub fn block_of(&self, ptr: HeapPtr) -> Block {
        self.block_at(ptr.header())
    }

    /// The usable bytes of `block`, between its two tags.
    pub fn payload(&self, block: &Block) -> &[u8] {
        self.source.slice(payload_range(block))
    }

    /// The usable bytes of `block`, mutably.
    pub fn payload_mut(&mut self, block: &Block) -> &mut [u8] {
        self.source.slice_mut(payload_range(block))
    }

    /// Copies `len` bytes between two payloads of this arena.
    pub fn copy_payload(&mut self, from: HeapPtr, to: HeapPtr, len: usize) {
        self.source.copy_within(from.offset(), to.offset(), len);
    }

    /// A census of the block chain.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            extent: self.extent(),
            ..HeapStats::default()
        };
        for block in self.blocks() {
            stats.blocks += 1;
            if block.is_free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
                stats.largest_free = stats.largest_free.max(block.size);
            } else {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += block.size;
            }
        }
        stats
    }

    /// The memory source backing the arena.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The memory source backing the arena, mutably.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

fn payload_range(block: &Block) -> Range<usize> {
    block.payload()..block.footer()
}

impl<S: MemorySource> Debug for Arena<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("start", &self.start)
            .field("extent", &self.extent())
            .finish()
    }
}

/// Iterator over the blocks of an [`Arena`], in address order.
#[derive(Debug)]
pub struct Blocks<'a, S: MemorySource> {
    arena: &'a Arena<S>,
    next: usize,
}

impl<S: MemorySource> Iterator for Blocks<'_, S> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.arena.block_at(self.next);
        if block.size == 0 {
            return None;
        }
        self.next = block::next_header(block.addr, block.tag());
        Some(block)
    }
}

/// Block chain census, as returned by `stats()` on the allocators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes of the heap region, sentinels included.
    pub extent: usize,
    /// Blocks between the prologue and the epilogue.
    pub blocks: usize,
    pub allocated_blocks: usize,
    /// Total size of allocated blocks, tags included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    /// Total size of free blocks, tags included.
    pub free_bytes: usize,
    /// Size of the largest free block.
    pub largest_free: usize,
}
