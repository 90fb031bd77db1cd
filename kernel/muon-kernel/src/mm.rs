//! Kernel heap wiring.
//!
//! Installs the chunk-coalescing allocator from `muon-mm` as the global
//! allocator on the kernel target. The heap grows through a single
//! expand hook, which is the only path from allocation to the
//! page-mapping primitive. Host builds use the host allocator and test
//! the heap directly in `muon-mm`.

use core::alloc::{GlobalAlloc, Layout};

use muon_core::sync::SpinLock;
use muon_mm::heap::{ExpandFn, Heap};

use crate::config::HEAP_PARANOIA;

/// Allocations are carved 16-byte aligned; larger alignments fail.
const HEAP_ALIGN: usize = 16;

static HEAP: SpinLock<Option<Heap>> = SpinLock::new(None);

/// Hands the heap its initial range and expand hook.
///
/// # Safety
///
/// The range must be mapped, writable, and owned exclusively by the
/// heap; `expand` must return ranges with the same property.
pub unsafe fn init(base: usize, size: usize, expand: ExpandFn) {
    let mut heap = HEAP.lock();
    assert!(heap.is_none(), "kernel heap initialized twice");
    // SAFETY: Forwarded caller contract.
    *heap = Some(unsafe { Heap::new(base, size, Some(expand), HEAP_PARANOIA) });
}

/// The global-allocator facade over the kernel heap.
pub struct KernelAllocator;

// SAFETY: Delegates to the locked heap; the heap hands out disjoint,
// 16-byte-aligned live chunks and `dealloc` returns exactly what
// `alloc` produced.
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEAP_ALIGN {
            return core::ptr::null_mut();
        }
        let heap = HEAP.lock();
        match heap.as_ref().and_then(|h| h.allocate(layout.size())) {
            Some(addr) => addr as *mut u8,
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let heap = HEAP.lock();
        if let Some(heap) = heap.as_ref() {
            heap.free(ptr as usize);
        }
    }
}

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;
