//! Salloc - A segregated free list heap allocator
//!
//! The heap is one contiguous region that only ever grows, bounded by a
//! permanently allocated prologue and epilogue. Every block carries a 4 byte
//! boundary tag at both ends holding its size and allocation bit, and free
//! blocks reuse their payload for the links of one of nine size class lists.
//!
//! ```text
//!   pad   prologue     block            block                  epilogue
//!  +----+-----+-----+----+---------+----+----+------------+----+----+
//!  | 0  | 8/1 | 8/1 | hd | payload | ft | hd | prev next  | ft | 0/1|
//!  +----+-----+-----+----+---------+----+----+------------+----+----+
//!                        ^ 8 byte aligned    ^ free links
//! ```
//!
//! All addresses are offsets into the region owned by a [`MemorySource`], so
//! allocators can be created, inspected and thrown away freely.
#![cfg_attr(not(test), no_std)]
#![warn(missing_debug_implementations)]
#![forbid(unsafe_op_in_unsafe_fn)]

use core::sync::atomic::{AtomicBool, Ordering};

extern crate alloc;

#[macro_use]
#[allow(unused_macros)]
pub(crate) mod alog;

pub mod alloc_wrap;
pub mod arena;
pub mod block;
mod check;
pub mod error;
pub mod free_list;
pub mod implicit;
pub mod memory;
pub mod mut_alloc;
pub mod seglist;
pub mod size_class;

pub use alloc_wrap::LockedHeap;
pub use arena::{Arena, HeapStats};
pub use block::{Block, HeapPtr, Tag};
pub use error::{AllocError, HeapCheckError};
pub use implicit::ImplicitAllocator;
pub use memory::{MemRegion, MemorySource};
pub use mut_alloc::HeapAllocator;
pub use seglist::SegregatedAllocator;

pub(crate) static ALLOC_LOG: AtomicBool = AtomicBool::new(false);
pub(crate) static HEAP_CHECK: AtomicBool = AtomicBool::new(cfg!(feature = "checked"));

/// Enables logging for the allocator.
pub fn enable_logging() {
    ALLOC_LOG.store(true, Ordering::Relaxed);
}

/// Disables logging for the allocator
pub fn disable_logging() {
    ALLOC_LOG.store(false, Ordering::Relaxed);
}

pub(crate) fn should_log() -> bool {
    ALLOC_LOG.load(Ordering::Relaxed)
}

/// Makes every public allocator operation verify the whole heap afterwards, panicking on the first
/// inconsistency. Enabled from the start when built with the `checked` feature.
pub fn set_checking(enabled: bool) {
    HEAP_CHECK.store(enabled, Ordering::Relaxed);
}

/// Returns whether heap checking after every operation is active.
pub fn checking_enabled() -> bool {
    HEAP_CHECK.load(Ordering::Relaxed)
}

/// Byte `i` of the fill pattern for allocation `id`. Filling payloads with it and checking it later
/// exposes blocks that overlap or get clobbered.
pub fn fill_pattern(id: usize, i: usize) -> u8 {
    (id.wrapping_mul(131) ^ i.wrapping_mul(7)) as u8
}

#[cfg(test)]
pub(crate) mod test_common {
    use crate::memory::MemRegion;

    /// Small regions keep the tests fast and make exhaustion easy to hit.
    pub const TEST_REGION: usize = 1 << 20;

    pub fn region(capacity: Option<usize>) -> MemRegion {
        MemRegion::with_capacity(capacity.unwrap_or(TEST_REGION))
    }

    pub use crate::fill_pattern as pattern;

    mod log_internal {
        use ctor::ctor;

        #[ctor]
        static INIT: () = {
            let _ = env_logger::builder().is_test(true).try_init();
            crate::enable_logging();
            crate::set_checking(true);
        };
    }
}
