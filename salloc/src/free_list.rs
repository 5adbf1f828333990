//! Intrusive, doubly linked free lists, one per size class.
//!
//! A free block stores its links in the first two payload words:
//!
//! ```text
//!  header      +4     +8                     footer
//! +--------+--------+--------+-------------+--------+
//! | size/0 |  prev  |  next  |     ...     | size/0 |
//! +--------+--------+--------+-------------+--------+
//! ```
//!
//! Links are header offsets; offset 0 (the alignment pad) stands for "none".
use crate::arena::Arena;
use crate::block::{Block, WORD_SIZE};
use crate::memory::MemorySource;
use crate::size_class::{self, NUM_SIZE_CLASSES};

const PREV: usize = WORD_SIZE;
const NEXT: usize = 2 * WORD_SIZE;
const NIL: u32 = 0;

/// The heads of the nine size class lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeLists {
    heads: [Option<usize>; NUM_SIZE_CLASSES],
}

impl FreeLists {
    /// Nine empty lists.
    pub const fn new() -> Self {
        Self {
            heads: [None; NUM_SIZE_CLASSES],
        }
    }

    /// Header offset of the first block in `class`.
    pub fn head(&self, class: usize) -> Option<usize> {
        self.heads[class]
    }

    /// Marks `block` free and pushes it onto the front of its class list.
    pub fn insert<S: MemorySource>(&mut self, arena: &mut Arena<S>, block: Block) {
        let block = Block {
            is_free: true,
            ..block
        };
        let class = size_class::index_for(block.size);
        let head = self.heads[class];

        arena.write_block(&block);
        set_link(arena, block.addr + PREV, None);
        set_link(arena, block.addr + NEXT, head);
        if let Some(head) = head {
            set_link(arena, head + PREV, Some(block.addr));
        }
        self.heads[class] = Some(block.addr);
        atrace!("Filed {:?} under class {}", block, class);
    }

    /// Unlinks `block` from the list it was filed under. `block.size` must still be the size it
    /// was inserted with.
    pub fn remove<S: MemorySource>(&mut self, arena: &mut Arena<S>, block: Block) {
        let prev = Self::prev(arena, block.addr);
        let next = Self::next(arena, block.addr);

        match prev {
            // First in its list
            None => self.heads[size_class::index_for(block.size)] = next,
            Some(prev) => set_link(arena, prev + NEXT, next),
        }
        if let Some(next) = next {
            set_link(arena, next + PREV, prev);
        }
    }

    /// The block before `header` in its list.
    pub fn prev<S: MemorySource>(arena: &Arena<S>, header: usize) -> Option<usize> {
        link(arena, header + PREV)
    }

    /// The block after `header` in its list.
    pub fn next<S: MemorySource>(arena: &Arena<S>, header: usize) -> Option<usize> {
        link(arena, header + NEXT)
    }

    /// Iterates the blocks of `class`, most recently freed first.
    pub fn iter<'a, S: MemorySource>(&self, arena: &'a Arena<S>, class: usize) -> FreeListIter<'a, S> {
        FreeListIter {
            arena,
            cursor: self.heads[class],
        }
    }

    /// Number of blocks filed under `class`.
    pub fn len<S: MemorySource>(&self, arena: &Arena<S>, class: usize) -> usize {
        self.iter(arena, class).count()
    }

    /// Whether every list is empty.
    pub fn is_empty(&self) -> bool {
        self.heads.iter().all(Option::is_none)
    }
}

fn link<S: MemorySource>(arena: &Arena<S>, offset: usize) -> Option<usize> {
    match arena.word(offset) {
        NIL => None,
        header => Some(header as usize),
    }
}

fn set_link<S: MemorySource>(arena: &mut Arena<S>, offset: usize, target: Option<usize>) {
    // Arenas stay below 4 GiB, so every header fits.
    arena.set_word(offset, target.map_or(NIL, |header| header as u32));
}

/// Iterator over one free list.
#[derive(Debug)]
pub struct FreeListIter<'a, S: MemorySource> {
    arena: &'a Arena<S>,
    cursor: Option<usize>,
}

impl<S: MemorySource> Iterator for FreeListIter<'_, S> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let header = self.cursor?;
        self.cursor = FreeLists::next(self.arena, header);
        Some(self.arena.block_at(header))
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::block::Tag;
    use crate::memory::MemRegion;

    /// An arena holding `sizes` as allocated blocks, laid out back to back.
    fn arena_with(sizes: &[usize]) -> (Arena<MemRegion>, Vec<Block>) {
        let mut arena = Arena::new(MemRegion::with_capacity(8192)).unwrap();
        let total = sizes.iter().sum();
        let mut addr = arena.grow(total).unwrap() - WORD_SIZE;
        arena.set_tag(arena.epilogue(), Tag::EPILOGUE);
        let mut blocks = Vec::new();
        for &size in sizes {
            let block = Block::new(addr, size, false);
            arena.write_block(&block);
            blocks.push(block);
            addr = block.end();
        }
        (arena, blocks)
    }

    fn headers<S: MemorySource>(lists: &FreeLists, arena: &Arena<S>, class: usize) -> Vec<usize> {
        lists.iter(arena, class).map(|b| b.addr).collect()
    }

    #[test]
    fn test_new_lists_are_empty() {
        let (arena, _) = arena_with(&[48]);
        let lists = FreeLists::new();
        assert!(lists.is_empty());
        for class in 0..NUM_SIZE_CLASSES {
            assert_eq!(lists.head(class), None);
            assert_eq!(lists.len(&arena, class), 0);
        }
    }

    #[test]
    fn test_insert_is_lifo() {
        let (mut arena, blocks) = arena_with(&[48, 48, 48]);
        let mut lists = FreeLists::new();
        for block in &blocks {
            lists.insert(&mut arena, *block);
        }

        assert_eq!(
            headers(&lists, &arena, 1),
            [blocks[2].addr, blocks[1].addr, blocks[0].addr]
        );
        assert!(arena.block_at(blocks[0].addr).is_free);
        assert_eq!(arena.tag(blocks[0].footer()), Tag::new(48, false));
        assert_eq!(FreeLists::prev(&arena, blocks[2].addr), None);
        assert_eq!(FreeLists::prev(&arena, blocks[0].addr), Some(blocks[1].addr));
    }

    #[test]
    fn test_insert_by_class() {
        let (mut arena, blocks) = arena_with(&[24, 200, 5000]);
        let mut lists = FreeLists::new();
        for block in &blocks {
            lists.insert(&mut arena, *block);
        }

        assert_eq!(lists.head(0), Some(blocks[0].addr));
        assert_eq!(lists.head(3), Some(blocks[1].addr));
        assert_eq!(lists.head(8), Some(blocks[2].addr));
        assert_eq!(lists.len(&arena, 8), 1);
        assert_eq!(lists.head(5), None);
    }

    #[test]
    fn test_remove_middle() {
        let (mut arena, blocks) = arena_with(&[48, 48, 48]);
        let mut lists = FreeLists::new();
        for block in &blocks {
            lists.insert(&mut arena, *block);
        }

        lists.remove(&mut arena, blocks[1]);
        assert_eq!(headers(&lists, &arena, 1), [blocks[2].addr, blocks[0].addr]);
        assert_eq!(FreeLists::prev(&arena, blocks[0].addr), Some(blocks[2].addr));
    }

    #[test]
    fn test_remove_head() {
        let (mut arena, blocks) = arena_with(&[48, 48]);
        let mut lists = FreeLists::new();
        lists.insert(&mut arena, blocks[0]);
        lists.insert(&mut arena, blocks[1]);

        lists.remove(&mut arena, blocks[1]);
        assert_eq!(lists.head(1), Some(blocks[0].addr));
        assert_eq!(FreeLists::prev(&arena, blocks[0].addr), None);
    }

    #[test]
    fn test_remove_last_empties_list() {
        let (mut arena, blocks) = arena_with(&[48, 48]);
        let mut lists = FreeLists::new();
        lists.insert(&mut arena, blocks[0]);
        lists.insert(&mut arena, blocks[1]);

        lists.remove(&mut arena, blocks[0]);
        assert_eq!(FreeLists::next(&arena, blocks[1].addr), None);
        lists.remove(&mut arena, blocks[1]);
        assert_eq!(lists.head(1), None);
        assert!(lists.is_empty());
    }
}
