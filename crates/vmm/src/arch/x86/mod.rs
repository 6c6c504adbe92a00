//! x86 hardware implementation of the paging primitives.
//!
//! The active address space is selected by the CR3 control register, and the
//! translation cache (TLB) is invalidated by reloading CR3.

use crate::PhysicalAddress;

/// Returns the root of the address space currently loaded in CR3.
pub fn active_root() -> Option<PhysicalAddress> {
    // SAFETY: Reading CR3 has no side effects.
    let root = unsafe { ::x86::controlregs::cr3() } as usize;
    Some(PhysicalAddress::new(root & !(super::PAGE_SIZE - 1)))
}

/// Loads the given directory root into CR3, making it the active address space.
///
/// # Safety
/// Loading a directory that does not map the currently executing code, stack,
/// and the directory itself is undefined behavior.
pub unsafe fn activate(root: PhysicalAddress) {
    // SAFETY: Forwarded to the caller.
    unsafe { ::x86::controlregs::cr3_write(root.as_usize() as u64) }
}

/// Flushes the translation cache for the active address space.
pub fn flush_tlb() {
    // Reloading CR3 invalidates every non-global TLB entry.
    // SAFETY: Rewriting the current CR3 value does not change the address space.
    unsafe { ::x86::controlregs::cr3_write(::x86::controlregs::cr3()) }
}

/// Halts the processor. Used only for unrecoverable boot-time failures.
pub fn halt() -> ! {
    // SAFETY: Masking interrupts and halting is the terminal state; nothing
    // runs after this point.
    unsafe {
        ::x86::irq::disable();
        loop {
            ::x86::halt();
        }
    }
}
