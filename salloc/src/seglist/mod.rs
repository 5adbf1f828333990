//! Segregated free list allocator.

pub use allocator::SegregatedAllocator;

use crate::arena::HeapStats;
use crate::block::HeapPtr;
use crate::error::{AllocError, HeapCheckError};
use crate::memory::MemorySource;
use crate::mut_alloc::HeapAllocator;
pub mod allocator;

impl<S: MemorySource> HeapAllocator for SegregatedAllocator<S> {
    fn allocate(&mut self, size: usize) -> Result<HeapPtr, AllocError> {
        SegregatedAllocator::allocate(self, size)
    }

    fn release(&mut self, ptr: Option<HeapPtr>) {
        SegregatedAllocator::release(self, ptr)
    }

    fn reallocate(
        &mut self,
        ptr: Option<HeapPtr>,
        size: usize,
    ) -> Result<Option<HeapPtr>, AllocError> {
        SegregatedAllocator::reallocate(self, ptr, size)
    }

    fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Result<HeapPtr, AllocError> {
        SegregatedAllocator::zero_allocate(self, count, elem_size)
    }

    fn usable_size(&self, ptr: HeapPtr) -> usize {
        SegregatedAllocator::usable_size(self, ptr)
    }

    fn payload(&self, ptr: HeapPtr) -> &[u8] {
        SegregatedAllocator::payload(self, ptr)
    }

    fn payload_mut(&mut self, ptr: HeapPtr) -> &mut [u8] {
        SegregatedAllocator::payload_mut(self, ptr)
    }

    fn check_heap(&self, verbose: bool) -> Result<(), HeapCheckError> {
        SegregatedAllocator::check_heap(self, verbose)
    }

    fn stats(&self) -> HeapStats {
        SegregatedAllocator::stats(self)
    }

    fn base_ptr(&mut self) -> *mut u8 {
        self.arena.source_mut().base_ptr()
    }
}
