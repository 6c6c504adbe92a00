//! In-place view of a page directory or page table block.

use crate::{PhysicalAddress, arch, entry::PageEntry};

/// A page directory or page table: 1024 entries filling one 4096-byte block.
///
/// Tables are never constructed as Rust values; they are viewed in place over
/// physical blocks obtained from the frame allocator. A freshly zeroed block
/// is a valid, entirely empty table.
#[repr(C)]
pub struct Table {
    entries: [PageEntry; arch::ENTRY_COUNT],
}

// The in-place view is only sound if the layout matches the hardware format.
const _: () = assert!(size_of::<Table>() == arch::PAGE_SIZE);

impl Table {
    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < arch::ENTRY_COUNT, "table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < arch::ENTRY_COUNT, "table index out of bounds");
        &mut self.entries[index]
    }

    /// Overwrites every entry of this table with the entries of `other`.
    pub fn copy_entries_from(&mut self, other: &Table) {
        self.entries = other.entries;
    }

    /// Returns the number of entries in this table.
    pub const fn len(&self) -> usize {
        arch::ENTRY_COUNT
    }

    /// Returns true if no entry is present.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_present())
    }
}

/// A handle to a page table reachable from a directory entry.
///
/// Every table is either exclusively owned by the directory holding the
/// handle, or shared by reference from another context (kernel tables have
/// kernel lifetime). Destruction frees `Owned` tables only, which keeps
/// destroy and clone-failure paths free of double-frees by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableHandle {
    /// The directory allocated this table and must free it.
    Owned(PhysicalAddress),
    /// The table belongs to another, longer-lived context.
    Shared(PhysicalAddress),
}

impl TableHandle {
    /// Returns the physical address of the table.
    pub fn address(self) -> PhysicalAddress {
        match self {
            Self::Owned(address) | Self::Shared(address) => address,
        }
    }
}
