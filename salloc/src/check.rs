//! Heap consistency checks shared by both allocators.
use crate::arena::{Arena, SENTINEL_OVERHEAD};
use crate::block::{self, DWORD_SIZE, Tag, WORD_SIZE};
use crate::error::HeapCheckError;
use crate::free_list::FreeLists;
use crate::memory::MemorySource;
use crate::size_class::{self, NUM_SIZE_CLASSES};

/// What a block walk saw.
#[derive(Debug, Default)]
pub(crate) struct Census {
    pub free_per_class: [usize; NUM_SIZE_CLASSES],
}

/// Walks the block chain from the prologue to the epilogue.
///
/// Verifies the sentinels, alignment, minimum sizes, header/footer agreement, that no two free
/// blocks are adjacent, and that the blocks exactly cover the arena.
pub(crate) fn walk_heap<S: MemorySource>(
    arena: &Arena<S>,
    min_block: usize,
    verbose: bool,
) -> Result<Census, HeapCheckError> {
    let prologue = arena.prologue();
    if arena.tag(prologue) != Tag::PROLOGUE || arena.tag(prologue + WORD_SIZE) != Tag::PROLOGUE {
        return Err(HeapCheckError::BadPrologue);
    }

    let epilogue = arena.epilogue();
    let mut census = Census::default();
    let mut offset = arena.heap_lo();
    let mut counted = 0;
    let mut prev_free = false;

    while offset < epilogue {
        let block = arena.block_at(offset);
        if block.payload() % DWORD_SIZE != 0 || block.size % DWORD_SIZE != 0 {
            return Err(HeapCheckError::Misaligned { offset });
        }
        if block.size < min_block {
            return Err(HeapCheckError::Undersized {
                offset,
                size: block.size,
                min: min_block,
            });
        }
        if block.end() > epilogue {
            return Err(HeapCheckError::Overrun {
                offset,
                size: block.size,
            });
        }
        let header = arena.tag(offset);
        let footer = arena.tag(block::footer_of(offset, header));
        if header != footer {
            return Err(HeapCheckError::TagMismatch {
                offset,
                header: header.bits(),
                footer: footer.bits(),
            });
        }
        if block.is_free {
            if prev_free {
                return Err(HeapCheckError::Uncoalesced { offset });
            }
            census.free_per_class[size_class::index_for(block.size)] += 1;
        }
        if verbose {
            ainfo!("{:#08x}: {:?}", offset, header);
        }

        prev_free = block.is_free;
        counted += block.size;
        offset = block.end();
    }

    if arena.tag(epilogue) != Tag::EPILOGUE {
        return Err(HeapCheckError::BadEpilogue { offset: epilogue });
    }
    let extent = arena.extent();
    if counted + SENTINEL_OVERHEAD != extent {
        return Err(HeapCheckError::ExtentMismatch { counted, extent });
    }
    Ok(census)
}

/// Verifies that every free block is listed exactly once, in the list of its class, with intact
/// back links.
pub(crate) fn check_free_lists<S: MemorySource>(
    arena: &Arena<S>,
    lists: &FreeLists,
    census: &Census,
) -> Result<(), HeapCheckError> {
    let (lo, hi) = (arena.heap_lo(), arena.epilogue());
    for class in 0..NUM_SIZE_CLASSES {
        let free = census.free_per_class[class];
        let mut listed = 0;
        let mut prev = None;
        let mut cursor = lists.head(class);

        while let Some(offset) = cursor {
            listed += 1;
            // A cycle or a foreign node always overshoots the census.
            if listed > free {
                return Err(HeapCheckError::FreeListCount {
                    class,
                    listed,
                    free,
                });
            }
            if offset < lo || offset >= hi {
                return Err(HeapCheckError::StrayNode { class, offset });
            }
            let block = arena.block_at(offset);
            if !block.is_free {
                return Err(HeapCheckError::AllocatedInFreeList { class, offset });
            }
            let expected = size_class::index_for(block.size);
            if expected != class {
                return Err(HeapCheckError::WrongClass {
                    offset,
                    size: block.size,
                    class,
                    expected,
                });
            }
            if FreeLists::prev(arena, offset) != prev {
                return Err(HeapCheckError::BrokenLink { offset });
            }
            prev = Some(offset);
            cursor = FreeLists::next(arena, offset);
        }

        if listed != free {
            return Err(HeapCheckError::FreeListCount {
                class,
                listed,
                free,
            });
        }
    }
    Ok(())
}
