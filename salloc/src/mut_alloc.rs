//! The interface shared by the allocators.
use crate::arena::HeapStats;
use crate::block::HeapPtr;
use crate::error::{AllocError, HeapCheckError};

/// The four dynamic-memory routines plus the inspection hooks shared by the allocators in this
/// crate. Every method needs `&mut self`; sharing an allocator goes through
/// [`LockedHeap`](crate::LockedHeap).
pub trait HeapAllocator {
    /// Allocates at least `size` bytes, 8 byte aligned.
    fn allocate(&mut self, size: usize) -> Result<HeapPtr, AllocError>;
    /// Releases an allocation. `None` is a no-op.
    fn release(&mut self, ptr: Option<HeapPtr>);
    /// Resizes an allocation, see the implementors for their exact policy.
    fn reallocate(
        &mut self,
        ptr: Option<HeapPtr>,
        size: usize,
    ) -> Result<Option<HeapPtr>, AllocError>;
    /// Allocates `count * elem_size` bytes, all zero.
    fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Result<HeapPtr, AllocError>;
    /// Bytes usable at `ptr`, at least what was requested.
    fn usable_size(&self, ptr: HeapPtr) -> usize;
    /// The usable bytes at `ptr`.
    fn payload(&self, ptr: HeapPtr) -> &[u8];
    /// The usable bytes at `ptr`, mutably.
    fn payload_mut(&mut self, ptr: HeapPtr) -> &mut [u8];
    /// Checks heap consistency, returning the first error found.
    fn check_heap(&self, verbose: bool) -> Result<(), HeapCheckError>;
    /// Block counts and sizes of the current heap.
    fn stats(&self) -> HeapStats;
    /// Address that payload offsets are relative to. Stable for the allocator's lifetime.
    fn base_ptr(&mut self) -> *mut u8;
}
