//! Address types for physical and virtual memory management.
//!
//! This module provides newtype wrappers around physical and virtual
//! addresses, plus the translator used to reach page table blocks through
//! their physical addresses.

use core::fmt;
use core::ops::{Add, Sub};

use crate::arch;

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
use crate::arch::EmulatedMemory;

/// Address translator for reaching physical memory through virtual addresses.
///
/// Page table blocks are identified by physical address but must be read and
/// written through pointers. This enum supports two modes:
/// - Hardware: the kernel's direct mapping of physical memory at a fixed offset
/// - Emulated: a simulated physical memory buffer (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a new hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a new emulated translator with the given memory size.
    #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Sets the global address translator.
    ///
    /// This function must be called exactly once during initialization, before
    /// any page table block is touched.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation", not(target_arch = "x86"))))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        #[cfg(not(any(test, feature = "software-emulation", not(target_arch = "x86"))))]
        {
            ADDRESS_TRANSLATOR.get().expect(
                "address translator not set; call AddressTranslator::set_current during initialization",
            )
        }

        #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                // SAFETY: We leak the reference to make it 'static. This is safe because:
                // 1. In test mode, each thread has its own ADDRESS_TRANSLATOR
                // 2. Once set, it's never modified (spin::Once guarantees this)
                // 3. The thread-local lives for the entire duration of the thread
                unsafe {
                    &*(t.get().expect(
                        "address translator not set; call AddressTranslator::set_current during initialization",
                    ) as *const AddressTranslator)
                }
            })
        }
    }

    /// Returns a reference to the current global address translator if it has been set.
    #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
    pub fn try_current() -> Option<&'static AddressTranslator> {
        ADDRESS_TRANSLATOR.with(|t| {
            t.get().map(|translator| {
                // SAFETY: Same reasoning as current() - we leak the reference for 'static lifetime
                unsafe { &*(translator as *const AddressTranslator) }
            })
        })
    }

    /// Translates a physical address to a virtual address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: usize) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }

    /// Allocates one page-table-sized block from the emulated space.
    ///
    /// Returns the physical address of the block, or None if the space is
    /// exhausted.
    #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
    pub fn allocate_block(&self) -> Option<usize> {
        match self {
            Self::Hardware { .. } => {
                panic!("cannot allocate from hardware translator")
            }
            Self::Emulated(mem) => mem.allocate_block(),
        }
    }
}

/// Global address translator.
///
/// This is initialized once during kernel initialization (with the Hardware
/// variant). In test/software-emulation mode, this is thread-local to allow
/// each test to have its own emulated memory space.
#[cfg(not(any(test, feature = "software-emulation", not(target_arch = "x86"))))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self((self.0 + align - 1) & !(align - 1))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     This is a newtype wrapper around the raw representation of a physical\n\
     address. It provides methods for address manipulation and alignment checks."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the maximum physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     This is a newtype wrapper around the raw representation of a virtual\n\
     address. It provides methods for address manipulation, alignment checks,\n\
     and extracting the page directory/table indices."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the virtual address space.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_virtual(addr),
            "virtual address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the offset within the page (bits 0-11).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (arch::PAGE_SIZE - 1)
    }

    /// Returns the index into the page directory selecting the page table
    /// for this address (bits 22-31).
    #[inline]
    pub const fn directory_index(self) -> usize {
        arch::page_index(self.0, 1)
    }

    /// Returns the index into the page table selecting the entry for this
    /// address (bits 12-21).
    #[inline]
    pub const fn table_index(self) -> usize {
        arch::page_index(self.0, 0)
    }
}
