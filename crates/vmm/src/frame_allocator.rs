//! The physical frame allocator contract.
//!
//! The virtual memory manager never manages physical memory itself: every
//! directory and page table lives in a block obtained from an external
//! allocator (the kernel's buddy allocator in production). The core only ever
//! allocates blocks of exactly one page-table size.

use crate::{PhysicalAddress, arch};

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
use crate::address::AddressTranslator;

/// Errors that can occur while mutating a mapping tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The frame allocator could not satisfy a block request.
    OutOfMemory,
}

/// Supplier of page-table-sized physical memory blocks.
///
/// Blocks are always `PAGE_SIZE` bytes, `PAGE_SIZE`-aligned, and zeroed when
/// handed out, so a fresh block is directly usable as an empty directory or
/// table.
pub trait FrameAllocator {
    /// Allocates one zeroed, page-aligned block.
    fn allocate_zeroed(&mut self) -> Result<PhysicalAddress, AllocError>;

    /// Returns a previously allocated block to the allocator.
    fn free(&mut self, block: PhysicalAddress);
}

/// Frame allocator backed by the emulated physical memory.
///
/// Freed blocks go onto a free list and are reused before the emulated space
/// grows. The allocator counts outstanding blocks so tests can assert that
/// destroying a context releases everything it owned, and it can carry an
/// allocation budget so tests can inject out-of-memory failures at a chosen
/// point.
#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
pub struct EmulatedFrameAllocator {
    free_list: Vec<PhysicalAddress>,
    outstanding: usize,
    budget: Option<usize>,
}

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
impl EmulatedFrameAllocator {
    /// Creates an allocator with no allocation budget.
    pub fn new() -> Self {
        Self {
            free_list: Vec::new(),
            outstanding: 0,
            budget: None,
        }
    }

    /// Creates an allocator that fails with `OutOfMemory` after `budget`
    /// successful allocations.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            free_list: Vec::new(),
            outstanding: 0,
            budget: Some(budget),
        }
    }

    /// Replaces the remaining allocation budget.
    pub fn set_budget(&mut self, budget: Option<usize>) {
        self.budget = budget;
    }

    /// Returns the number of blocks currently allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
impl Default for EmulatedFrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
impl FrameAllocator for EmulatedFrameAllocator {
    fn allocate_zeroed(&mut self) -> Result<PhysicalAddress, AllocError> {
        if let Some(remaining) = self.budget.as_mut() {
            if *remaining == 0 {
                return Err(AllocError::OutOfMemory);
            }
            *remaining -= 1;
        }

        let translator = AddressTranslator::current();
        let block = match self.free_list.pop() {
            Some(block) => block,
            None => PhysicalAddress::new(
                translator.allocate_block().ok_or(AllocError::OutOfMemory)?,
            ),
        };

        // The contract hands out zeroed blocks; reused blocks may hold stale
        // entries from their previous life.
        let ptr = translator.phys_to_ptr::<u8>(block.as_usize());
        // SAFETY: The block is PAGE_SIZE bytes of emulated memory that no one
        // else references once it is off the free list.
        unsafe { core::ptr::write_bytes(ptr, 0, arch::PAGE_SIZE) };

        self.outstanding += 1;
        Ok(block)
    }

    fn free(&mut self, block: PhysicalAddress) {
        self.outstanding -= 1;
        self.free_list.push(block);
    }
}
