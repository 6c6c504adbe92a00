//! Two-level virtual memory manager.
//!
//! This crate manages 32-bit virtual address spaces built from a page
//! directory and page tables of 1024 entries each. It owns the mapping tree
//! and the bit-packed entry format; physical memory itself comes from an
//! external [`FrameAllocator`].
//!
//! The crate is `no_std` on the target. On the host (and under the
//! `software-emulation` feature) the hardware surface is emulated, so the
//! same tree-walking code can be exercised by ordinary tests.
#![cfg_attr(
    all(target_arch = "x86", not(test), not(feature = "software-emulation")),
    no_std
)]

mod address;
pub mod arch;
mod context;
mod entry;
mod flags;
mod frame_allocator;
mod kernel;
mod table;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use arch::{ENTRY_COUNT, PAGE_SIZE};
pub use context::Context;
pub use entry::PageEntry;
pub use flags::PageFlags;
pub use frame_allocator::{AllocError, FrameAllocator};
pub use kernel::{KernelSection, create_user_context, init_kernel_context, kernel_context};
pub use table::{Table, TableHandle};

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
pub use frame_allocator::EmulatedFrameAllocator;
