//! A spin-locked allocator for use as a `static` or `#[global_allocator]`.
use core::alloc::{GlobalAlloc, Layout};
use core::fmt::Debug;

use spin::{Mutex, MutexGuard, Once};

use crate::block::{DWORD_SIZE, HeapPtr};
use crate::mut_alloc::HeapAllocator;

/// A lock around a [`HeapAllocator`], usable as a `static` and as a [`GlobalAlloc`].
///
/// Only layouts aligned to at most 8 bytes can be served; anything stricter is refused with a null
/// pointer. Allocator logging must stay disabled while this is the global allocator, as the logger
/// itself allocates.
pub struct LockedHeap<A>
where
    A: HeapAllocator,
{
    inner: Once<Mutex<A>>,
}

impl<A> LockedHeap<A>
where
    A: HeapAllocator,
{
    /// Creates a new locked heap. The allocator is uninitialized.
    pub const fn new() -> Self {
        Self { inner: Once::new() }
    }

    /// Initializes the allocator with the given function. Later calls do nothing.
    pub fn init<F>(&self, init: F)
    where
        F: FnOnce() -> A,
    {
        self.inner.call_once(|| Mutex::new(init()));
    }

    /// Gets the allocator if it is initialized and not currently locked.
    pub fn get(&self) -> Option<MutexGuard<'_, A>> {
        self.inner.get()?.try_lock()
    }

    /// Spins until the allocator is free. `None` if it was never initialized.
    pub fn lock(&self) -> Option<MutexGuard<'_, A>> {
        self.inner.get().map(Mutex::lock)
    }

    /// Is the allocator locked? An uninitialized heap counts as locked.
    pub fn is_locked(&self) -> bool {
        self.inner.get().is_none_or(Mutex::is_locked)
    }

    /// Is the allocator initialized?
    pub fn is_initialized(&self) -> bool {
        self.inner.is_completed()
    }
}

impl<A> Default for LockedHeap<A>
where
    A: HeapAllocator,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a payload offset to an address inside the allocator's region.
fn to_ptr<A: HeapAllocator>(heap: &mut A, ptr: HeapPtr) -> *mut u8 {
    heap.base_ptr().wrapping_add(ptr.offset())
}

/// Maps an address handed out by [`to_ptr`] back to its payload offset.
fn to_heap_ptr<A: HeapAllocator>(heap: &mut A, ptr: *mut u8) -> Option<HeapPtr> {
    let offset = (ptr as usize).checked_sub(heap.base_ptr() as usize)?;
    HeapPtr::new(offset)
}

// SAFETY: Every returned pointer addresses a payload of at least `layout.size()` bytes inside the
// region owned by the allocator, which never moves. Payloads are 8 byte aligned and larger
// alignments are refused. The mutex serializes the allocator's own accesses, and those only touch
// tags, free links and payloads not handed out, always through raw word accesses or slices limited
// to one block, so callers' pointers into live payloads are never aliased by a reference.
unsafe impl<A> GlobalAlloc for LockedHeap<A>
where
    A: HeapAllocator,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > DWORD_SIZE {
            awarn!("Refusing allocation aligned to {} bytes", layout.align());
            return core::ptr::null_mut();
        }
        let Some(mut heap) = self.lock() else {
            aerror!("Attempted to allocate with an uninitialized heap");
            return core::ptr::null_mut();
        };
        match heap.allocate(layout.size()) {
            Ok(ptr) => to_ptr(&mut *heap, ptr),
            Err(err) => {
                aerror!("Allocation of {:?} failed: {}", layout, err);
                core::ptr::null_mut()
            }
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > DWORD_SIZE {
            return core::ptr::null_mut();
        }
        let Some(mut heap) = self.lock() else {
            return core::ptr::null_mut();
        };
        match heap.zero_allocate(1, layout.size()) {
            Ok(ptr) => to_ptr(&mut *heap, ptr),
            Err(_) => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(mut heap) = self.lock() else {
            aerror!("Attempted to deallocate with an uninitialized heap");
            return;
        };
        let ptr = to_heap_ptr(&mut *heap, ptr);
        heap.release(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > DWORD_SIZE {
            return core::ptr::null_mut();
        }
        let Some(mut heap) = self.lock() else {
            return core::ptr::null_mut();
        };
        let old = to_heap_ptr(&mut *heap, ptr);
        match heap.reallocate(old, new_size) {
            Ok(Some(new)) => to_ptr(&mut *heap, new),
            Ok(None) | Err(_) => core::ptr::null_mut(),
        }
    }
}

impl<A> Debug for LockedHeap<A>
where
    A: HeapAllocator + Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.get() {
            Some(heap) => heap.fmt(f),
            None => write!(f, "LockedHeap {{ <locked> }}"),
        }
    }
}
