//! The bit-packed page directory/table entry format.

use crate::{PhysicalAddress, flags::PageFlags, table::TableHandle};

/// A single page directory or page table entry.
///
/// Entries are 32-bit words packing a page-aligned physical address
/// (bits 12-31) and flags (bits 0-11). The two bit fields never overlap, so
/// the address stored in an entry is always page-aligned. An absent entry is
/// the all-zero word, which makes "empty" and "zero" interchangeable and lets
/// freshly zeroed blocks serve as empty tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Physical address mask (bits 12-31, aligned to 4 KiB pages).
    const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Flag bits mask (bits 0-11).
    const FLAGS_MASK: u32 = 0x0000_0FFF;

    /// Creates a new entry.
    ///
    /// The physical address must be page-aligned (lowest 12 bits must be zero).
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.as_usize() & (Self::FLAGS_MASK as usize) == 0,
            "physical address must be page-aligned"
        );

        let addr_bits = (address.as_usize() as u32) & Self::ADDRESS_MASK;
        let flag_bits = flags.to_raw() & Self::FLAGS_MASK;
        Self(addr_bits | flag_bits)
    }

    /// Returns the physical address stored in this entry.
    ///
    /// Returns None if the entry is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(PhysicalAddress::new((self.0 & Self::ADDRESS_MASK) as usize))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        let addr_bits = self.0 & Self::ADDRESS_MASK;
        let flag_bits = flags.to_raw() & Self::FLAGS_MASK;
        self.0 = addr_bits | flag_bits;
    }

    /// Returns whether this entry is present (mapped).
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Interpreting this as a directory entry, returns a handle to the table
    /// it points to, or None if no table is present.
    ///
    /// The handle is `Owned` when this directory allocated the table and is
    /// responsible for freeing it, `Shared` when the table is aliased from
    /// another context.
    pub fn table_handle(self) -> Option<TableHandle> {
        let address = self.address()?;
        if self.flags().is_owned() {
            Some(TableHandle::Owned(address))
        } else {
            Some(TableHandle::Shared(address))
        }
    }

    /// Returns a copy of this entry with the owned bit cleared, for aliasing
    /// the pointed-to table into another directory.
    pub fn aliased(self) -> Self {
        let mut entry = self;
        let mut flags = entry.flags();
        flags.set_owned(false);
        entry.set_flags(flags);
        entry
    }

    /// Clears this entry (sets it to the empty, all-zero word).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw u32 value of this entry.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl Default for PageEntry {
    fn default() -> Self {
        Self(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableHandle;

    fn flags(present: bool, writable: bool, user: bool, owned: bool) -> PageFlags {
        let mut flags = PageFlags::empty();
        flags.set_present(present);
        flags.set_writable(writable);
        flags.set_user(user);
        flags.set_owned(owned);
        flags
    }

    #[test]
    fn absent_entry_is_zero() {
        let entry = PageEntry::default();
        assert_eq!(entry.as_u32(), 0);
        assert!(!entry.is_present());
        assert_eq!(entry.address(), None);
    }

    #[test]
    fn packs_address_and_flags() {
        let entry = PageEntry::new(
            PhysicalAddress::new(0x0010_0000),
            flags(true, true, false, false),
        );
        assert!(entry.is_present());
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x0010_0000)));
        assert!(entry.flags().is_writable());
        assert!(!entry.flags().is_user());
    }

    #[test]
    fn address_hidden_when_absent() {
        let entry = PageEntry::new(
            PhysicalAddress::new(0x0010_0000),
            flags(false, true, false, false),
        );
        assert_eq!(entry.address(), None);
    }

    #[test]
    fn clear_yields_empty_word() {
        let mut entry = PageEntry::new(
            PhysicalAddress::new(0x0020_0000),
            flags(true, false, true, false),
        );
        entry.clear();
        assert_eq!(entry, PageEntry::default());
    }

    #[test]
    fn table_handle_follows_owned_bit() {
        let owned = PageEntry::new(
            PhysicalAddress::new(0x3000),
            flags(true, true, false, true),
        );
        assert_eq!(
            owned.table_handle(),
            Some(TableHandle::Owned(PhysicalAddress::new(0x3000)))
        );

        let shared = owned.aliased();
        assert_eq!(
            shared.table_handle(),
            Some(TableHandle::Shared(PhysicalAddress::new(0x3000)))
        );
        assert_eq!(shared.address(), owned.address());

        assert_eq!(PageEntry::default().table_handle(), None);
    }

    // Exhaustively checks the disjointness invariant: no flag combination ever
    // bleeds into the address bits and no address ever bleeds into the flags.
    #[test]
    fn address_and_flag_bits_are_disjoint() {
        let addresses = [
            0x0000_0000usize,
            0x0000_1000,
            0x0010_0000,
            0x7FFF_F000,
            0x8000_0000,
            0xFFFF_F000,
        ];

        for &addr in &addresses {
            for raw in 0u32..8 {
                for owned in [false, true] {
                    let mut entry_flags = PageFlags::from_raw(raw);
                    entry_flags.set_owned(owned);
                    let entry = PageEntry::new(PhysicalAddress::new(addr), entry_flags);

                    assert_eq!(entry.flags().to_raw(), entry_flags.to_raw());
                    if entry.is_present() {
                        assert_eq!(entry.address(), Some(PhysicalAddress::new(addr)));
                        assert!(entry.address().unwrap().is_aligned(crate::arch::PAGE_SIZE));
                    } else {
                        assert_eq!(entry.address(), None);
                    }
                }
            }
        }
    }
}
