//! Address-space contexts: the two-level mapping tree and the operations on it.
//!
//! A [`Context`] is one virtual address space, rooted in a single 4096-byte
//! page directory. Directory entries point to page tables, table entries point
//! to physical page frames. Every block in the tree comes from the external
//! [`FrameAllocator`], and every mutating operation threads the allocator
//! through explicitly.
//!
//! A context is deliberately not `Clone` and has no `Drop`: the tree lives in
//! physical blocks the allocator owns, so the only correct teardown is
//! [`Context::destroy`]. Dropping a `Context` value leaks its blocks.

use crate::address::AddressTranslator;
use crate::arch;
use crate::entry::PageEntry;
use crate::flags::PageFlags;
use crate::frame_allocator::{AllocError, FrameAllocator};
use crate::table::{Table, TableHandle};
use crate::{PhysicalAddress, VirtualAddress};

/// One virtual address space.
///
/// Holds the physical address of the page directory. Exclusive access for
/// mutation is expressed through `&mut self`; the context itself carries no
/// lock.
pub struct Context {
    root: PhysicalAddress,
}

impl Context {
    /// Creates an empty context from one zeroed directory block.
    ///
    /// On allocation failure no partial state exists and nothing needs to be
    /// torn down.
    pub fn new(allocator: &mut dyn FrameAllocator) -> Result<Self, AllocError> {
        let root = allocator.allocate_zeroed()?;
        Ok(Self { root })
    }

    /// Creates a context that starts out seeing exactly `kernel`'s mappings.
    ///
    /// The kernel's directory entries are copied with the owned bit cleared:
    /// the new context aliases the kernel's page tables rather than deep
    /// copying them, so it never frees them on destroy.
    pub fn with_kernel_mappings(
        allocator: &mut dyn FrameAllocator,
        kernel: &Context,
    ) -> Result<Self, AllocError> {
        let mut context = Self::new(allocator)?;
        for index in 0..arch::ENTRY_COUNT {
            let entry = kernel.directory().entry(index);
            if entry.is_present() {
                *context.directory_mut().entry_mut(index) = entry.aliased();
            }
        }
        Ok(context)
    }

    /// Creates a structural copy of this context.
    ///
    /// Per source directory entry: absent entries are skipped; user tables are
    /// duplicated (a fresh owned table with the source's raw entries, so the
    /// clone can diverge, though both still reference the same data frames);
    /// non-user tables are kernel tables and are aliased by reference.
    ///
    /// On allocation failure the partially-built clone is destroyed before the
    /// error surfaces; no partial clone escapes.
    pub fn clone_from(
        &self,
        allocator: &mut dyn FrameAllocator,
    ) -> Result<Self, AllocError> {
        let mut clone = Self::new(allocator)?;
        for index in 0..arch::ENTRY_COUNT {
            let entry = self.directory().entry(index);
            let Some(handle) = entry.table_handle() else {
                continue;
            };

            if entry.flags().is_user() {
                let table = match allocator.allocate_zeroed() {
                    Ok(table) => table,
                    Err(error) => {
                        clone.destroy(allocator);
                        return Err(error);
                    }
                };
                clone
                    .table_mut(table)
                    .copy_entries_from(self.table(handle.address()));
                let mut flags = entry.flags();
                flags.set_owned(true);
                *clone.directory_mut().entry_mut(index) = PageEntry::new(table, flags);
            } else {
                *clone.directory_mut().entry_mut(index) = entry.aliased();
            }
        }
        Ok(clone)
    }

    /// Releases every table this context owns, then the directory itself.
    ///
    /// Aliased (shared) tables are left untouched; they belong to a
    /// longer-lived context. The caller must guarantee this context is not the
    /// active hardware context and is not referenced elsewhere.
    pub fn destroy(self, allocator: &mut dyn FrameAllocator) {
        for index in 0..arch::ENTRY_COUNT {
            if let Some(TableHandle::Owned(table)) =
                self.directory().entry(index).table_handle()
            {
                allocator.free(table);
            }
        }
        allocator.free(self.root);
    }

    /// Returns the physical address of this context's page directory.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Returns whether this context is the active hardware context.
    pub fn is_active(&self) -> bool {
        arch::active_root() == Some(self.root)
    }

    /// Makes this context the active hardware context.
    ///
    /// # Safety
    /// The context must map the currently executing code, the stack, and its
    /// own directory, or execution cannot continue past the switch.
    pub unsafe fn activate(&self) {
        // SAFETY: Forwarded to the caller.
        unsafe { arch::activate(self.root) }
    }

    /// Maps one page, translating `virt` to `phys` with the given protection.
    ///
    /// Allocates a zeroed page table on first use of the directory slot;
    /// allocation failure aborts before any tree mutation. Protection flags
    /// accumulate into the directory entry so it stays at least as permissive
    /// as any page beneath it. Flushes the translation cache if this context
    /// is active.
    ///
    /// # Panics
    /// Panics if `phys` or `virt` is not page-aligned.
    pub fn map(
        &mut self,
        allocator: &mut dyn FrameAllocator,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        self.map_no_flush(allocator, phys, virt, flags)?;
        self.flush_if_active();
        Ok(())
    }

    /// Maps `pages` consecutive pages starting at `virt` to consecutive
    /// physical pages starting at `phys`.
    ///
    /// All-or-nothing: on the first failure the entire requested range is
    /// unmapped, including pages never reached, before the error surfaces.
    /// The translation cache is flushed once at the end either way, not once
    /// per page.
    pub fn map_range(
        &mut self,
        allocator: &mut dyn FrameAllocator,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        pages: usize,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        for page in 0..pages {
            let offset = page * arch::PAGE_SIZE;
            if let Err(error) = self.map_no_flush(allocator, phys + offset, virt + offset, flags)
            {
                log::warn!(
                    "failed to map page {} of {} at {}, rolling back the range",
                    page,
                    pages,
                    virt + offset
                );
                for rollback in 0..pages {
                    self.unmap_no_flush(virt + rollback * arch::PAGE_SIZE);
                }
                self.flush_if_active();
                return Err(error);
            }
        }
        self.flush_if_active();
        Ok(())
    }

    /// Maps one page at its own physical address.
    pub fn identity_map(
        &mut self,
        allocator: &mut dyn FrameAllocator,
        address: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        self.map(
            allocator,
            address,
            VirtualAddress::new(address.as_usize()),
            flags,
        )
    }

    /// Maps a range of pages at their own physical addresses. Same rollback
    /// contract as [`Context::map_range`].
    pub fn identity_map_range(
        &mut self,
        allocator: &mut dyn FrameAllocator,
        address: PhysicalAddress,
        pages: usize,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        self.map_range(
            allocator,
            address,
            VirtualAddress::new(address.as_usize()),
            pages,
            flags,
        )
    }

    /// Unmaps one page.
    ///
    /// Clears the table entry to the empty word if its table is present; a
    /// no-op otherwise. The emptied table is not reclaimed even if this was
    /// its last entry. Flushes the translation cache if this context is
    /// active.
    pub fn unmap(&mut self, virt: VirtualAddress) {
        self.unmap_no_flush(virt);
        self.flush_if_active();
    }

    /// Unmaps `pages` consecutive pages starting at `virt`.
    ///
    /// Always succeeds; unmapping needs no allocation. One translation cache
    /// flush at the end of the range.
    pub fn unmap_range(&mut self, virt: VirtualAddress, pages: usize) {
        for page in 0..pages {
            self.unmap_no_flush(virt + page * arch::PAGE_SIZE);
        }
        self.flush_if_active();
    }

    /// Returns the table entry for `virt` if both its directory entry and its
    /// table entry are present.
    ///
    /// This is the single lookup every other query composes from.
    pub fn resolve(&self, virt: VirtualAddress) -> Option<PageEntry> {
        let handle = self.directory().entry(virt.directory_index()).table_handle()?;
        let entry = self.table(handle.address()).entry(virt.table_index());
        entry.is_present().then_some(entry)
    }

    /// Returns whether `virt` is mapped.
    pub fn is_mapped(&self, virt: VirtualAddress) -> bool {
        self.resolve(virt).is_some()
    }

    /// Translates a virtual address to the physical address it maps to,
    /// preserving the in-page offset.
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let base = self.resolve(virt)?.address()?;
        Some(base + virt.page_offset())
    }

    /// Returns the protection flags for `virt`, or empty flags if unmapped.
    pub fn entry_flags(&self, virt: VirtualAddress) -> PageFlags {
        match self.resolve(virt) {
            Some(entry) => entry.flags().protection(),
            None => PageFlags::empty(),
        }
    }

    /// Returns whether every page overlapping `[virt, virt + size)` is mapped.
    ///
    /// Used to validate that a buffer is safe to access before touching it.
    pub fn contains(&self, virt: VirtualAddress, size: usize) -> bool {
        let Some(end) = virt.as_usize().checked_add(size) else {
            return false;
        };
        if end > 0 && !arch::validate_virtual(end - 1) {
            return false;
        }

        let mut page = virt.align_down(arch::PAGE_SIZE).as_usize();
        while page < end {
            if !self.is_mapped(VirtualAddress::new(page)) {
                return false;
            }
            page += arch::PAGE_SIZE;
        }
        true
    }

    fn map_no_flush(
        &mut self,
        allocator: &mut dyn FrameAllocator,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        assert!(
            phys.is_aligned(arch::PAGE_SIZE),
            "physical address must be page-aligned"
        );
        assert!(
            virt.is_aligned(arch::PAGE_SIZE),
            "virtual address must be page-aligned"
        );

        let protection = flags.protection();
        let table = self.ensure_table(allocator, virt.directory_index(), protection)?;

        let mut leaf_flags = protection;
        leaf_flags.set_present(true);
        *self.table_mut(table).entry_mut(virt.table_index()) = PageEntry::new(phys, leaf_flags);
        Ok(())
    }

    fn unmap_no_flush(&mut self, virt: VirtualAddress) {
        let Some(handle) = self.directory().entry(virt.directory_index()).table_handle()
        else {
            return;
        };
        self.table_mut(handle.address())
            .entry_mut(virt.table_index())
            .clear();
    }

    /// Returns the table for the given directory slot, allocating a zeroed one
    /// on first use. The protection flags accumulate into the directory entry.
    fn ensure_table(
        &mut self,
        allocator: &mut dyn FrameAllocator,
        index: usize,
        protection: PageFlags,
    ) -> Result<PhysicalAddress, AllocError> {
        let existing = self.directory().entry(index);
        if let Some(handle) = existing.table_handle() {
            let mut flags = existing.flags();
            flags.insert(protection);
            self.directory_mut().entry_mut(index).set_flags(flags);
            return Ok(handle.address());
        }

        let table = allocator.allocate_zeroed()?;
        let mut flags = protection;
        flags.set_present(true);
        flags.set_owned(true);
        *self.directory_mut().entry_mut(index) = PageEntry::new(table, flags);
        Ok(table)
    }

    fn flush_if_active(&self) {
        if self.is_active() {
            arch::flush_tlb();
        }
    }

    fn directory(&self) -> &Table {
        // SAFETY: root points at a live, PAGE_SIZE-sized block that only this
        // context mutates, and mutation requires &mut self.
        unsafe { &*AddressTranslator::current().phys_to_ptr::<Table>(self.root.as_usize()) }
    }

    fn directory_mut(&mut self) -> &mut Table {
        // SAFETY: As in directory(); &mut self makes this the only reference.
        unsafe { &mut *AddressTranslator::current().phys_to_ptr::<Table>(self.root.as_usize()) }
    }

    fn table(&self, address: PhysicalAddress) -> &Table {
        // SAFETY: address came out of a present directory entry, so it is a
        // live table block reachable from this context's tree.
        unsafe { &*AddressTranslator::current().phys_to_ptr::<Table>(address.as_usize()) }
    }

    fn table_mut(&mut self, address: PhysicalAddress) -> &mut Table {
        // SAFETY: As in table(). Shared kernel tables are mutated only under
        // the kernel context's lock, which every aliasing caller goes through.
        unsafe { &mut *AddressTranslator::current().phys_to_ptr::<Table>(address.as_usize()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_allocator::EmulatedFrameAllocator;

    fn setup(frames: usize) {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(frames * arch::PAGE_SIZE));
        }
    }

    fn rw_user() -> PageFlags {
        let mut flags = PageFlags::empty();
        flags.set_writable(true);
        flags.set_user(true);
        flags
    }

    fn rw_kernel() -> PageFlags {
        let mut flags = PageFlags::empty();
        flags.set_writable(true);
        flags
    }

    mod mapping {
        use super::*;

        #[test]
        fn map_resolve_unmap_round_trip() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            let phys = PhysicalAddress::new(0x0010_0000);
            let virt = VirtualAddress::new(0x4000_0000);

            assert!(!context.is_mapped(virt));
            context.map(&mut alloc, phys, virt, rw_user()).unwrap();
            assert!(context.is_mapped(virt));

            let entry = context.resolve(virt).unwrap();
            assert_eq!(entry.address(), Some(phys));

            context.unmap(virt);
            assert!(!context.is_mapped(virt));
            assert_eq!(context.resolve(virt), None);
        }

        #[test]
        fn translate_preserves_page_offset() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            let phys = PhysicalAddress::new(0x0010_0000);
            let virt = VirtualAddress::new(0x4000_0000);
            context.map(&mut alloc, phys, virt, rw_user()).unwrap();

            for offset in [0usize, 1, 0x123, 0xFFF] {
                assert_eq!(context.translate(virt + offset), Some(phys + offset));
            }
            assert_eq!(context.translate(VirtualAddress::new(0x5000_0000)), None);
        }

        #[test]
        fn entry_flags_round_trip() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            let virt = VirtualAddress::new(0x4000_0000);
            context
                .map(&mut alloc, PhysicalAddress::new(0x0010_0000), virt, rw_user())
                .unwrap();
            assert_eq!(context.entry_flags(virt), rw_user());

            context.unmap(virt);
            assert_eq!(context.entry_flags(virt), PageFlags::empty());
        }

        #[test]
        fn identity_map_maps_in_place() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            let address = PhysicalAddress::new(0x0000_3000);
            context.identity_map(&mut alloc, address, rw_kernel()).unwrap();
            assert_eq!(
                context.translate(VirtualAddress::new(0x3000)),
                Some(address)
            );
        }

        #[test]
        fn unmap_of_absent_table_is_noop() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            context.unmap(VirtualAddress::new(0x4000_0000));
            assert_eq!(alloc.outstanding(), 1);
        }

        #[test]
        fn directory_entry_accumulates_protection() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            // Two pages in the same table, one kernel-only and one user.
            context
                .map(
                    &mut alloc,
                    PhysicalAddress::new(0x0010_0000),
                    VirtualAddress::new(0x4000_0000),
                    rw_kernel(),
                )
                .unwrap();
            context
                .map(
                    &mut alloc,
                    PhysicalAddress::new(0x0010_1000),
                    VirtualAddress::new(0x4000_1000),
                    rw_user(),
                )
                .unwrap();

            let dir_entry = context
                .directory()
                .entry(VirtualAddress::new(0x4000_0000).directory_index());
            assert!(dir_entry.flags().is_writable());
            assert!(dir_entry.flags().is_user());
            // Only one table was allocated for the shared directory slot.
            assert_eq!(alloc.outstanding(), 2);
        }

        #[test]
        #[should_panic(expected = "virtual address must be page-aligned")]
        fn map_rejects_unaligned_virtual_address() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();
            let _ = context.map(
                &mut alloc,
                PhysicalAddress::new(0x0010_0000),
                VirtualAddress::new(0x4000_0123),
                rw_user(),
            );
        }

        #[test]
        #[should_panic(expected = "physical address must be page-aligned")]
        fn map_rejects_unaligned_physical_address() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();
            let _ = context.map(
                &mut alloc,
                PhysicalAddress::new(0x0010_0123),
                VirtualAddress::new(0x4000_0000),
                rw_user(),
            );
        }
    }

    mod ranges {
        use super::*;

        // 64 contiguous user pages at 0x40000000 backed by physical pages at
        // 0x100000.
        #[test]
        fn map_range_contains_and_unmap_range() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            let phys = PhysicalAddress::new(0x0010_0000);
            let virt = VirtualAddress::new(0x4000_0000);
            context
                .map_range(&mut alloc, phys, virt, 64, rw_user())
                .unwrap();

            assert_eq!(
                context.translate(VirtualAddress::new(0x4000_0000 + 0x1234)),
                Some(PhysicalAddress::new(0x0010_0000 + 0x1234))
            );
            assert!(context.contains(virt, 64 * arch::PAGE_SIZE));

            context.unmap_range(virt, 64);
            assert_eq!(context.translate(VirtualAddress::new(0x4000_1234)), None);
            assert!(!context.contains(virt, 64 * arch::PAGE_SIZE));
        }

        #[test]
        fn contains_covers_partial_pages() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            let virt = VirtualAddress::new(0x4000_0000);
            context
                .map_range(&mut alloc, PhysicalAddress::new(0x0010_0000), virt, 2, rw_user())
                .unwrap();

            // An unaligned buffer spilling into the unmapped third page.
            assert!(context.contains(VirtualAddress::new(0x4000_0800), 0x1000));
            assert!(!context.contains(VirtualAddress::new(0x4000_1800), 0x1000));
            // A range past the end of the address space can never be mapped.
            assert!(!context.contains(VirtualAddress::new(0xFFFF_F000), 2 * arch::PAGE_SIZE));
        }

        #[test]
        fn failed_map_range_rolls_back_the_whole_range() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            // Two pages straddling a directory boundary need two tables; allow
            // only the first.
            alloc.set_budget(Some(1));
            let virt = VirtualAddress::new(0x003F_F000);
            let result = context.map_range(
                &mut alloc,
                PhysicalAddress::new(0x0010_0000),
                virt,
                2,
                rw_user(),
            );
            assert_eq!(result, Err(AllocError::OutOfMemory));

            // The page that did get mapped was rolled back too.
            assert!(!context.is_mapped(virt));
            assert!(!context.is_mapped(VirtualAddress::new(0x0040_0000)));
            assert!(!context.contains(virt, 2 * arch::PAGE_SIZE));

            // The table allocated before the failure still belongs to the
            // context and is released on destroy.
            alloc.set_budget(None);
            context.destroy(&mut alloc);
            assert_eq!(alloc.outstanding(), 0);
        }
    }

    mod tlb {
        use super::*;

        #[test]
        fn mutations_flush_only_the_active_context() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            let phys = PhysicalAddress::new(0x0010_0000);
            let virt = VirtualAddress::new(0x4000_0000);

            let before = arch::flush_count();
            context.map(&mut alloc, phys, virt, rw_user()).unwrap();
            assert_eq!(arch::flush_count(), before, "inactive context must not flush");

            // SAFETY: The emulated machine does not execute through the
            // mappings, so activation cannot fault.
            unsafe { context.activate() };
            assert!(context.is_active());

            let before = arch::flush_count();
            context
                .map(&mut alloc, phys + arch::PAGE_SIZE, virt + arch::PAGE_SIZE, rw_user())
                .unwrap();
            assert_eq!(arch::flush_count(), before + 1);

            let before = arch::flush_count();
            context.unmap(virt);
            assert_eq!(arch::flush_count(), before + 1);
        }

        #[test]
        fn range_operations_flush_once() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();
            // SAFETY: Emulated machine, see above.
            unsafe { context.activate() };

            let phys = PhysicalAddress::new(0x0010_0000);
            let virt = VirtualAddress::new(0x4000_0000);

            let before = arch::flush_count();
            context
                .map_range(&mut alloc, phys, virt, 16, rw_user())
                .unwrap();
            assert_eq!(arch::flush_count(), before + 1);

            let before = arch::flush_count();
            context.unmap_range(virt, 16);
            assert_eq!(arch::flush_count(), before + 1);
        }

        #[test]
        fn failed_range_still_flushes_once() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();
            // SAFETY: Emulated machine, see above.
            unsafe { context.activate() };

            alloc.set_budget(Some(1));
            let before = arch::flush_count();
            let result = context.map_range(
                &mut alloc,
                PhysicalAddress::new(0x0010_0000),
                VirtualAddress::new(0x003F_F000),
                2,
                rw_user(),
            );
            assert_eq!(result, Err(AllocError::OutOfMemory));
            assert_eq!(arch::flush_count(), before + 1);
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn new_fails_cleanly_when_out_of_memory() {
            setup(8);
            let mut alloc = EmulatedFrameAllocator::with_budget(0);
            assert!(Context::new(&mut alloc).is_err());
            assert_eq!(alloc.outstanding(), 0);
        }

        #[test]
        fn destroy_releases_every_owned_block() {
            setup(16);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut context = Context::new(&mut alloc).unwrap();

            // Mappings spread over three directory slots.
            for (phys, virt) in [
                (0x0010_0000usize, 0x0040_0000usize),
                (0x0011_0000, 0x4000_0000),
                (0x0012_0000, 0x8000_0000),
            ] {
                context
                    .map(
                        &mut alloc,
                        PhysicalAddress::new(phys),
                        VirtualAddress::new(virt),
                        rw_user(),
                    )
                    .unwrap();
            }
            assert_eq!(alloc.outstanding(), 4);

            context.destroy(&mut alloc);
            assert_eq!(alloc.outstanding(), 0);
        }

        #[test]
        fn with_kernel_mappings_aliases_kernel_tables() {
            setup(16);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut kernel = Context::new(&mut alloc).unwrap();
            kernel
                .map(
                    &mut alloc,
                    PhysicalAddress::new(0x0010_0000),
                    VirtualAddress::new(0x0040_0000),
                    rw_kernel(),
                )
                .unwrap();

            let user = Context::with_kernel_mappings(&mut alloc, &kernel).unwrap();
            assert_eq!(
                user.translate(VirtualAddress::new(0x0040_0000)),
                Some(PhysicalAddress::new(0x0010_0000))
            );

            // Only the directory itself was allocated for the user context;
            // destroying it leaves the kernel's table intact.
            user.destroy(&mut alloc);
            assert!(kernel.is_mapped(VirtualAddress::new(0x0040_0000)));

            kernel.destroy(&mut alloc);
            assert_eq!(alloc.outstanding(), 0);
        }
    }

    mod cloning {
        use super::*;

        #[test]
        fn kernel_tables_are_aliased_and_stay_shared() {
            setup(16);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut original = Context::new(&mut alloc).unwrap();

            original
                .map(
                    &mut alloc,
                    PhysicalAddress::new(0x0010_0000),
                    VirtualAddress::new(0x0040_0000),
                    rw_kernel(),
                )
                .unwrap();

            let clone = original.clone_from(&mut alloc).unwrap();

            // A later mutation through the original's kernel table is visible
            // in the clone, because the table is shared by reference.
            original
                .map(
                    &mut alloc,
                    PhysicalAddress::new(0x0011_0000),
                    VirtualAddress::new(0x0040_1000),
                    rw_kernel(),
                )
                .unwrap();
            assert_eq!(
                clone.translate(VirtualAddress::new(0x0040_1000)),
                Some(PhysicalAddress::new(0x0011_0000))
            );

            clone.destroy(&mut alloc);
            original.destroy(&mut alloc);
            assert_eq!(alloc.outstanding(), 0);
        }

        #[test]
        fn user_tables_are_duplicated_and_diverge() {
            setup(16);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut original = Context::new(&mut alloc).unwrap();

            original
                .map(
                    &mut alloc,
                    PhysicalAddress::new(0x0010_0000),
                    VirtualAddress::new(0x4000_0000),
                    rw_user(),
                )
                .unwrap();

            let mut clone = original.clone_from(&mut alloc).unwrap();

            // The clone starts with the same view of the user range.
            assert_eq!(
                clone.translate(VirtualAddress::new(0x4000_0000)),
                Some(PhysicalAddress::new(0x0010_0000))
            );

            // Mutating the clone's copy does not touch the original.
            clone.unmap(VirtualAddress::new(0x4000_0000));
            assert!(!clone.is_mapped(VirtualAddress::new(0x4000_0000)));
            assert!(original.is_mapped(VirtualAddress::new(0x4000_0000)));

            clone.destroy(&mut alloc);
            original.destroy(&mut alloc);
            assert_eq!(alloc.outstanding(), 0);
        }

        #[test]
        fn failed_clone_destroys_the_partial_copy() {
            setup(16);
            let mut alloc = EmulatedFrameAllocator::new();
            let mut original = Context::new(&mut alloc).unwrap();

            // Two user tables in the source, so the clone needs a directory
            // plus two table copies.
            for virt in [0x4000_0000usize, 0x8000_0000] {
                original
                    .map(
                        &mut alloc,
                        PhysicalAddress::new(0x0010_0000),
                        VirtualAddress::new(virt),
                        rw_user(),
                    )
                    .unwrap();
            }
            let before = alloc.outstanding();

            // Enough budget for the directory and the first table copy only.
            alloc.set_budget(Some(2));
            assert!(original.clone_from(&mut alloc).is_err());

            // The partial clone was fully torn down.
            assert_eq!(alloc.outstanding(), before);

            alloc.set_budget(None);
            original.destroy(&mut alloc);
            assert_eq!(alloc.outstanding(), 0);
        }
    }
}
