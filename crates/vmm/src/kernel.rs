//! Kernel context bootstrap and the process-wide kernel context singleton.
//!
//! The kernel owns exactly one privileged context, built once at boot after
//! the frame allocator is ready. It identity-maps all usable physical memory
//! above the first page (page zero stays unmapped so null dereferences fault),
//! write-protects the kernel's own read-only sections, and becomes the active
//! hardware context. Every user context starts as an alias of its mappings.

use crate::arch;
use crate::context::Context;
use crate::flags::PageFlags;
use crate::frame_allocator::{AllocError, FrameAllocator};
use crate::PhysicalAddress;

/// A loaded kernel image section, as described by the boot information.
///
/// Used solely to decide which regions of the identity mapping to mark
/// read-only.
pub trait KernelSection {
    /// Virtual (= physical, identity-mapped) start address of the section.
    fn start(&self) -> usize;

    /// Size of the section in bytes.
    fn size(&self) -> usize;

    /// Alignment of the section's start address.
    fn alignment(&self) -> usize;

    /// Whether the section is meant to be written at runtime.
    fn is_writable(&self) -> bool;
}

/// The kernel's context.
///
/// Initialized once by [`init_kernel_context`]. The lock is the
/// synchronization point for every mutation of kernel tables, including
/// mutations through contexts that alias them. In test mode the singleton is
/// thread-local so each test boots its own kernel.
#[cfg(not(any(test, feature = "software-emulation", not(target_arch = "x86"))))]
static KERNEL_CONTEXT: spin::Once<spin::RwLock<Context>> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
std::thread_local! {
    static KERNEL_CONTEXT: spin::Once<spin::RwLock<Context>> = spin::Once::new();
}

/// Builds the kernel context, activates it, and publishes it as the
/// process-wide singleton.
///
/// `memory_end` is the end of usable physical memory; everything from the
/// second page up to it is identity-mapped writable and kernel-only. Sections
/// that are page-aligned and not writable are then re-mapped read-only.
///
/// Boot-time allocation failure is unrecoverable: this function logs the
/// failure and halts instead of returning an error.
///
/// # Panics
/// Panics if the kernel context has already been initialized.
pub fn init_kernel_context<S, I>(
    allocator: &mut dyn FrameAllocator,
    memory_end: PhysicalAddress,
    sections: I,
) where
    S: KernelSection,
    I: IntoIterator<Item = S>,
{
    let context = match build_kernel_context(allocator, memory_end, sections) {
        Ok(context) => context,
        Err(AllocError::OutOfMemory) => {
            log::error!("cannot allocate the kernel context, halting");
            arch::halt();
        }
    };

    // SAFETY: The context identity-maps all physical memory above page zero,
    // which covers the executing code, the stack, and the directory itself.
    unsafe { context.activate() };
    publish(context);
    log::info!("kernel context active, physical memory mapped up to {}", memory_end);
}

/// Returns the kernel context singleton.
///
/// # Panics
/// Panics if [`init_kernel_context`] has not run yet.
pub fn kernel_context() -> &'static spin::RwLock<Context> {
    #[cfg(not(any(test, feature = "software-emulation", not(target_arch = "x86"))))]
    {
        KERNEL_CONTEXT.get().expect(
            "kernel context not initialized; call init_kernel_context during boot",
        )
    }

    #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
    {
        KERNEL_CONTEXT.with(|context| {
            // SAFETY: We leak the reference to make it 'static. In test mode
            // each thread has its own KERNEL_CONTEXT, it is never replaced
            // once set, and the thread-local outlives every borrow taken
            // through this function on the same thread.
            unsafe {
                &*(context.get().expect(
                    "kernel context not initialized; call init_kernel_context during boot",
                ) as *const spin::RwLock<Context>)
            }
        })
    }
}

/// Creates a new user context that initially sees exactly the kernel's
/// mappings, aliasing the kernel's page tables.
pub fn create_user_context(
    allocator: &mut dyn FrameAllocator,
) -> Result<Context, AllocError> {
    let kernel = kernel_context().read();
    Context::with_kernel_mappings(allocator, &kernel)
}

fn build_kernel_context<S, I>(
    allocator: &mut dyn FrameAllocator,
    memory_end: PhysicalAddress,
    sections: I,
) -> Result<Context, AllocError>
where
    S: KernelSection,
    I: IntoIterator<Item = S>,
{
    let mut context = Context::new(allocator)?;

    // Identity-map everything above page zero. Leaving the first page
    // unmapped turns null dereferences into faults.
    let first_page = PhysicalAddress::new(arch::PAGE_SIZE);
    let pages = (memory_end - first_page) / arch::PAGE_SIZE;
    let mut kernel_flags = PageFlags::empty();
    kernel_flags.set_writable(true);
    context.identity_map_range(allocator, first_page, pages, kernel_flags)?;

    for section in sections {
        protect_section(&mut context, allocator, &section)?;
    }
    Ok(context)
}

/// Re-maps a read-only section of the identity mapping without the writable
/// bit. Sections that are writable or not page-aligned are left alone.
fn protect_section<S: KernelSection>(
    context: &mut Context,
    allocator: &mut dyn FrameAllocator,
    section: &S,
) -> Result<(), AllocError> {
    if section.is_writable() || section.alignment() != arch::PAGE_SIZE {
        return Ok(());
    }
    let pages = section.size().div_ceil(arch::PAGE_SIZE);
    context.identity_map_range(
        allocator,
        PhysicalAddress::new(section.start()),
        pages,
        PageFlags::empty(),
    )
}

fn publish(context: Context) {
    #[cfg(not(any(test, feature = "software-emulation", not(target_arch = "x86"))))]
    {
        if KERNEL_CONTEXT.get().is_some() {
            panic!("kernel context already initialized");
        }
        KERNEL_CONTEXT.call_once(|| spin::RwLock::new(context));
    }

    #[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
    {
        KERNEL_CONTEXT.with(|slot| {
            if slot.get().is_some() {
                panic!("kernel context already initialized");
            }
            slot.call_once(|| spin::RwLock::new(context));
        });
    }
}
