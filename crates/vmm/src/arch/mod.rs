//! Architecture-specific primitives for virtual memory management.
//!
//! This module conditionally imports either the x86 hardware implementation
//! or the software emulation, depending on the target architecture and features.

// Use the x86 hardware implementation when we're on x86 and not testing or emulating.
// NOTE: We DO include the module even during tests so that rust-analyzer can see it.
#[cfg(target_arch = "x86")]
mod x86;
#[cfg(all(target_arch = "x86", not(test), not(feature = "software-emulation")))]
pub use x86::*;

// Use software emulation when:
// - Running tests, OR
// - the software-emulation feature is explicitly enabled, OR
// - the target has no 32-bit two-level MMU (host builds on other architectures).
#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
mod software;
#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
pub use software::*;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Number of entries in a page directory or page table.
pub const ENTRY_COUNT: usize = 1024;

/// Number of page table levels (the directory and one level of tables).
pub const PAGE_TABLE_LEVELS: usize = 2;

/// Number of index bits per level (1024 entries per table).
pub const INDEX_BITS: usize = 10;

/// Maximum physical address (32-bit physical address space).
pub const MAX_PHYSICAL_ADDRESS: usize = 0xFFFF_FFFF;

/// Maximum virtual address (32-bit virtual address space).
pub const MAX_VIRTUAL_ADDRESS: usize = 0xFFFF_FFFF;

/// Returns the page table index for a given virtual address at the specified level.
///
/// - Level 0: bits 12-21 (page table)
/// - Level 1: bits 22-31 (page directory)
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    let shift = match level {
        0 => 12,
        1 => 22,
        _ => panic!("level out of range for two-level paging (0-1)"),
    };
    (address >> shift) & ((1 << INDEX_BITS) - 1)
}

/// Validates a physical address.
///
/// Physical addresses must fit within 32 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr <= MAX_PHYSICAL_ADDRESS
}

/// Validates a virtual address.
///
/// Virtual addresses must fit within 32 bits.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr <= MAX_VIRTUAL_ADDRESS
}
