//! Boundary tags and the block view built on top of them.
//!
//! Every address here is a byte offset into the heap region. Nothing but the tags
//! themselves is needed to walk from a block to its footer or to either neighbour.
use core::num::NonZeroUsize;

/// Size of a boundary tag.
pub const WORD_SIZE: usize = 4;
/// Payload alignment, and the granularity of every block size.
pub const DWORD_SIZE: usize = 8;
/// A free block must hold a header, two links and a footer.
pub const MIN_BLOCK_SIZE: usize = 3 * DWORD_SIZE;
/// Largest request that will be considered.
pub const MAX_BLOCK_SIZE: usize = i32::MAX as usize;
/// Minimum amount by which the heap is extended.
pub const CHUNK_SIZE: usize = 1 << 12;

/// A boundary tag: the block size with the allocation flag in the low bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct Tag(u32);

impl Tag {
    /// Tag of both prologue words.
    pub const PROLOGUE: Tag = Tag::new(DWORD_SIZE, true);
    /// Tag of the epilogue header.
    pub const EPILOGUE: Tag = Tag::new(0, true);

    /// Encodes `size` (a multiple of 8) and the allocation flag.
    pub const fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size % DWORD_SIZE == 0, "block sizes are double-word multiples");
        Tag(size as u32 | allocated as u32)
    }

    /// Reinterprets a raw tag word.
    pub const fn from_bits(bits: u32) -> Self {
        Tag(bits)
    }

    /// The raw tag word.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Block size, with the flag bits masked off.
    pub const fn size(self) -> usize {
        (self.0 & !0x7) as usize
    }

    /// Whether the allocation bit is set.
    pub const fn is_allocated(self) -> bool {
        self.0 & 0x1 != 0
    }

    /// Splits the tag back into `(size, allocated)`.
    pub const fn decode(self) -> (usize, bool) {
        (self.size(), self.is_allocated())
    }
}

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Tag({}/{})",
            self.size(),
            if self.is_allocated() { 'a' } else { 'f' }
        )
    }
}

/// The fundamental unit of the heap: a decoded header.
/// Blocks are plain values; writing one back into the heap is up to the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Offset of the header tag
    pub addr: usize,
    /// The size of the block, header and footer included
    pub size: usize,
    ///  Is the block free or allocated
    pub is_free: bool,
}

impl Block {
    /// Create a new block with the given header offset, size, and allocation status.
    pub const fn new(addr: usize, size: usize, is_free: bool) -> Self {
        Self {
            addr,
            size,
            is_free,
        }
    }

    /// The tag stored in this block's header and footer.
    pub const fn tag(&self) -> Tag {
        Tag::new(self.size, !self.is_free)
    }

    /// Offset of the footer tag.
    pub const fn footer(&self) -> usize {
        footer_of(self.addr, self.tag())
    }

    /// Offset of the first payload byte.
    pub const fn payload(&self) -> usize {
        self.addr + WORD_SIZE
    }

    /// Offset of the next block's header.
    pub const fn end(&self) -> usize {
        next_header(self.addr, self.tag())
    }

    /// Bytes available to the caller: everything between the two tags.
    pub const fn usable_size(&self) -> usize {
        self.size - DWORD_SIZE
    }

    /// Split the block so that it keeps `size` bytes and returns the free remainder.
    /// Nothing is split if the remainder would be smaller than `min_remainder`.
    pub fn split(&mut self, size: usize, min_remainder: usize) -> Option<Block> {
        if self.size < size || self.size - size < min_remainder {
            return None;
        }

        let rest = Block::new(self.addr + size, self.size - size, true);
        self.size = size;
        Some(rest)
    }

    /// Merge two adjacent blocks into a single free block.
    pub fn merge(&self, other: &Block) -> Block {
        if other.addr < self.addr {
            return other.merge(self); // Ensure self is the block with the lower address
        }

        debug_assert!(self.is_adjacent(other), "Blocks are not adjacent");

        Block::new(self.addr, self.size + other.size, true)
    }

    /// Check if two blocks are adjacent to each other.
    pub fn is_adjacent(&self, other: &Block) -> bool {
        self.end() == other.addr || other.end() == self.addr
    }
}

/// Header offset of the block owning `payload`.
pub const fn header_of(payload: usize) -> usize {
    payload - WORD_SIZE
}

/// Footer offset of the block whose header at `header` reads `tag`.
pub const fn footer_of(header: usize, tag: Tag) -> usize {
    header + tag.size() - WORD_SIZE
}

/// Header offset of the block following the one at `header`.
pub const fn next_header(header: usize, tag: Tag) -> usize {
    header + tag.size()
}

/// Header offset of the block preceding `header`, given the footer tag just before it.
pub const fn prev_header(header: usize, prev_footer: Tag) -> usize {
    header - prev_footer.size()
}

/// Rounds a request up to a block size: room for both tags, double-word aligned and at least
/// `min_block` bytes. Zero and oversized requests yield `None`.
pub const fn adjust_request(size: usize, min_block: usize) -> Option<usize> {
    if size == 0 || size > MAX_BLOCK_SIZE {
        return None;
    }
    let adjusted = DWORD_SIZE * ((size + DWORD_SIZE + (DWORD_SIZE - 1)) / DWORD_SIZE);
    if adjusted < min_block {
        Some(min_block)
    } else {
        Some(adjusted)
    }
}

/// A handle to an allocation: the offset of its payload inside the heap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(NonZeroUsize);

impl HeapPtr {
    /// Wraps a payload offset. Offset zero is never a payload.
    pub const fn new(offset: usize) -> Option<Self> {
        match NonZeroUsize::new(offset) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    pub(crate) fn of_block(block: &Block) -> Self {
        const HEADER: NonZeroUsize = NonZeroUsize::new(WORD_SIZE).unwrap();
        Self(HEADER.saturating_add(block.addr))
    }

    /// Offset of the payload in the heap region.
    pub const fn offset(self) -> usize {
        self.0.get()
    }

    /// Offset of the header tag of the owning block.
    pub const fn header(self) -> usize {
        header_of(self.0.get())
    }

    /// Whether the payload is double-word aligned.
    pub const fn is_aligned(self) -> bool {
        self.0.get() % DWORD_SIZE == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_encoding() {
        let tag = Tag::new(4096, false);
        assert_eq!(tag.bits(), 4096);
        assert_eq!(tag.decode(), (4096, false));

        let tag = Tag::new(24, true);
        assert_eq!(tag.bits(), 25);
        assert_eq!(tag.decode(), (24, true));

        assert_eq!(Tag::PROLOGUE.bits(), 9);
        assert_eq!(Tag::EPILOGUE.bits(), 1);
    }

    #[test]
    fn test_tag_ignores_reserved_bits() {
        let tag = Tag::from_bits(0x46);
        assert_eq!(tag.size(), 0x40);
        assert!(!tag.is_allocated());
    }

    #[test]
    fn test_neighbour_offsets() {
        let tag = Tag::new(48, true);
        assert_eq!(footer_of(12, tag), 56);
        assert_eq!(next_header(12, tag), 60);
        assert_eq!(prev_header(60, tag), 12);
        assert_eq!(header_of(16), 12);
    }

    #[test]
    fn test_block_split() {
        let mut block = Block::new(12, 1024, true);
        let new_block = block.split(512, MIN_BLOCK_SIZE).unwrap();

        assert_eq!(block.size, 512);
        assert_eq!(new_block.size, 512);
        assert_eq!(new_block.addr, 12 + 512);
        assert!(new_block.is_free);
        assert_eq!(block.end(), new_block.addr);
    }

    #[test]
    fn test_block_split_remainder_too_small() {
        let mut block = Block::new(12, 64, true);
        assert!(block.split(48, MIN_BLOCK_SIZE).is_none());
        assert_eq!(block.size, 64);

        assert!(block.split(128, MIN_BLOCK_SIZE).is_none());
        assert_eq!(block.size, 64);

        let rest = block.split(40, MIN_BLOCK_SIZE).unwrap();
        assert_eq!(rest.size, 24);
    }

    #[test]
    fn test_block_merge_lower_to_higher() {
        let block1 = Block::new(0x1000, 512, true);
        let block2 = Block::new(0x1200, 512, true);

        let new_block = block1.merge(&block2);

        assert_eq!(new_block.size, 1024);
        assert_eq!(new_block.addr, block1.addr);
    }

    #[test]
    fn test_block_merge_higher_to_lower() {
        let block1 = Block::new(0x1000, 512, true);
        let block2 = Block::new(0x1200, 512, false);

        let new_block = block2.merge(&block1);

        assert_eq!(new_block.size, 1024);
        assert_eq!(new_block.addr, block1.addr);
        assert!(new_block.is_free);
    }

    #[test]
    fn test_block_is_adjacent() {
        let block1 = Block::new(0x1000, 512, true);
        let block2 = Block::new(0x1200, 512, true);
        let block3 = Block::new(0x1600, 512, true);

        assert!(block1.is_adjacent(&block2));
        assert!(block2.is_adjacent(&block1));
        assert!(!block1.is_adjacent(&block3));
    }

    #[test]
    fn test_adjust_request() {
        assert_eq!(adjust_request(0, MIN_BLOCK_SIZE), None);
        assert_eq!(adjust_request(1, MIN_BLOCK_SIZE), Some(24));
        assert_eq!(adjust_request(16, MIN_BLOCK_SIZE), Some(24));
        assert_eq!(adjust_request(17, MIN_BLOCK_SIZE), Some(32));
        assert_eq!(adjust_request(100, MIN_BLOCK_SIZE), Some(112));
        assert_eq!(adjust_request(3000, MIN_BLOCK_SIZE), Some(3008));
        assert_eq!(adjust_request(8, 2 * DWORD_SIZE), Some(16));
        assert_eq!(adjust_request(MAX_BLOCK_SIZE + 1, MIN_BLOCK_SIZE), None);
    }

    #[test]
    fn test_heap_ptr() {
        assert!(HeapPtr::new(0).is_none());
        let block = Block::new(12, 24, false);
        let ptr = HeapPtr::of_block(&block);
        assert_eq!(ptr.offset(), 16);
        assert_eq!(ptr.header(), 12);
        assert!(ptr.is_aligned());
    }
}
