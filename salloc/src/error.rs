//! Allocator error types.

/// Reasons an allocation request can fail. A failed request never changes the heap.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The request was for zero bytes or for more than the largest representable block.
    #[error("invalid allocation request of {size} bytes")]
    InvalidRequest { size: usize },
    /// `count * elem_size` does not fit in a `usize`.
    #[error("{count} elements of {elem_size} bytes overflow the address space")]
    SizeOverflow { count: usize, elem_size: usize },
    /// The memory source refused to extend the heap.
    #[error("memory source exhausted while requesting {requested} bytes")]
    OutOfMemory { requested: usize },
}

/// The first inconsistency found by a heap check.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapCheckError {
    /// The prologue words are not two allocated 8 byte tags.
    #[error("invalid prologue tags")]
    BadPrologue,
    /// The word at the break is not an allocated zero-size tag.
    #[error("invalid epilogue tag at {offset:#x}")]
    BadEpilogue { offset: usize },
    /// A block is smaller than the minimum block size.
    #[error("block at {offset:#x} has size {size}, below the minimum of {min}")]
    Undersized { offset: usize, size: usize, min: usize },
    /// A payload is not 8 byte aligned.
    #[error("block at {offset:#x} is not double-word aligned")]
    Misaligned { offset: usize },
    /// A block extends past the epilogue.
    #[error("block at {offset:#x} of size {size} runs past the epilogue")]
    Overrun { offset: usize, size: usize },
    /// Header and footer of a block differ.
    #[error("header and footer of block at {offset:#x} disagree ({header:#x} != {footer:#x})")]
    TagMismatch { offset: usize, header: u32, footer: u32 },
    /// Two free blocks are adjacent.
    #[error("free block at {offset:#x} was not coalesced with the free block before it")]
    Uncoalesced { offset: usize },
    /// The block sizes do not add up to the heap extent.
    #[error("blocks cover {counted} bytes but the arena spans {extent}")]
    ExtentMismatch { counted: usize, extent: usize },
    /// A free list holds a different number of blocks than the heap has free in its class.
    #[error("free list {class} holds {listed} blocks but the heap has {free} free blocks of that class")]
    FreeListCount { class: usize, listed: usize, free: usize },
    /// A free list link points outside the heap.
    #[error("free list {class} links to {offset:#x}, outside the heap")]
    StrayNode { class: usize, offset: usize },
    /// A free list holds an allocated block.
    #[error("allocated block at {offset:#x} is linked into free list {class}")]
    AllocatedInFreeList { class: usize, offset: usize },
    /// A free block sits in the list of another size class.
    #[error("block at {offset:#x} of size {size} is filed under class {class} instead of {expected}")]
    WrongClass {
        offset: usize,
        size: usize,
        class: usize,
        expected: usize,
    },
    /// A node's back link does not point at its predecessor.
    #[error("back link of free list node {offset:#x} is broken")]
    BrokenLink { offset: usize },
}
