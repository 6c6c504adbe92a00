//! Software emulation of the paging primitives for testing and development.
//!
//! This module emulates the pieces of the machine that the memory manager
//! touches: a physical memory space, the "current address space" register, and
//! the translation cache flush. The page table format itself is unchanged
//! (1024-entry, 4096-byte tables), so the tree-walking code under test is the
//! same code that runs on hardware.
//!
//! The emulated machine state is thread-local so that each test owns an
//! isolated machine.

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::PhysicalAddress;

std::thread_local! {
    /// The directory root most recently loaded via [`activate`].
    static ACTIVE_ROOT: Cell<Option<usize>> = const { Cell::new(None) };
    /// Number of translation cache flushes issued on this thread.
    static FLUSH_COUNT: Cell<usize> = const { Cell::new(0) };
}

/// Returns the root of the currently active address space, if one was activated.
pub fn active_root() -> Option<PhysicalAddress> {
    ACTIVE_ROOT.with(|root| root.get().map(PhysicalAddress::new))
}

/// Records the given directory root as the active address space.
///
/// # Safety
/// Matches the hardware contract; the emulation itself cannot fault.
pub unsafe fn activate(root: PhysicalAddress) {
    ACTIVE_ROOT.with(|active| active.set(Some(root.as_usize())));
}

/// Records a translation cache flush.
pub fn flush_tlb() {
    FLUSH_COUNT.with(|count| count.set(count.get() + 1));
}

/// Returns the number of translation cache flushes issued on this thread.
///
/// Tests use this to assert that mutations to the active address space flush
/// the cache and mutations to inactive ones do not.
pub fn flush_count() -> usize {
    FLUSH_COUNT.with(|count| count.get())
}

/// Halts the emulated machine. Panics, so boot-failure paths are testable.
pub fn halt() -> ! {
    panic!("halted");
}

/// Emulated physical memory.
///
/// Provides a simulated physical memory space for page table operations
/// without requiring actual hardware. Addresses handed out are offsets into
/// the backing buffer.
pub struct EmulatedMemory {
    /// The underlying buffer, u64-backed so page table entries are aligned.
    memory: Vec<u64>,
    /// Next allocation offset in bytes (simple bump allocator).
    next_alloc: AtomicUsize,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size in bytes.
    pub fn new(size: usize) -> Self {
        Self {
            memory: vec![0u64; size.div_ceil(size_of::<u64>())],
            next_alloc: AtomicUsize::new(0),
        }
    }

    /// Allocates one page-table-sized block from the emulated space.
    ///
    /// Returns the physical address of the block, or None if the space is
    /// exhausted. Blocks are always `PAGE_SIZE` bytes and `PAGE_SIZE`-aligned.
    pub fn allocate_block(&self) -> Option<usize> {
        loop {
            let current = self.next_alloc.load(Ordering::Relaxed);
            let end = current + super::PAGE_SIZE;
            if end > self.size() {
                return None;
            }
            if self
                .next_alloc
                .compare_exchange(current, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current);
            }
        }
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size(), "physical address out of bounds");
        // Handing out raw pointers is fine here; the memory manager is the
        // only writer and synchronizes access through &mut Context.
        unsafe { self.memory.as_ptr().cast::<u8>().add(phys).cast_mut() }
    }

    /// Returns the size of the emulated memory region in bytes.
    pub fn size(&self) -> usize {
        self.memory.len() * size_of::<u64>()
    }
}
