//! Page table entry flags.

/// Page table entry flags.
///
/// Flags occupy the low 12 bits of an entry, below the page-aligned address
/// bits. Bits 0-2 follow the hardware layout; bit 9 is one of the
/// software-available bits that the MMU ignores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(u32);

impl PageFlags {
    /// Present bit (bit 0). An entry is mapped if and only if this is set.
    const PRESENT: u32 = 1 << 0;

    /// Writable bit (bit 1).
    const WRITABLE: u32 = 1 << 1;

    /// User-accessible bit (bit 2).
    const USER: u32 = 1 << 2;

    /// Owned bit (bit 9, software-defined, ignored by the MMU).
    ///
    /// Set on a directory entry when this context allocated the table it
    /// points to and is responsible for freeing it. Cleared when the table is
    /// aliased from another context (shared, kernel-lifetime).
    const OWNED: u32 = 1 << 9;

    /// The caller-visible protection subset of the flags.
    const PROTECTION_MASK: u32 = Self::WRITABLE | Self::USER;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates page flags from a raw u32 value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw u32 value of these flags.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Returns only the protection flags (writable, user-accessible).
    pub const fn protection(self) -> Self {
        Self(self.0 & Self::PROTECTION_MASK)
    }

    /// Sets every flag that is set in `other`.
    pub fn insert(&mut self, other: PageFlags) {
        self.0 |= other.0;
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        (self.0 & Self::PRESENT) != 0
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        if present {
            self.0 |= Self::PRESENT;
        } else {
            self.0 &= !Self::PRESENT;
        }
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        (self.0 & Self::WRITABLE) != 0
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        if writable {
            self.0 |= Self::WRITABLE;
        } else {
            self.0 &= !Self::WRITABLE;
        }
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        (self.0 & Self::USER) != 0
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        if user {
            self.0 |= Self::USER;
        } else {
            self.0 &= !Self::USER;
        }
    }

    /// Returns whether the owned bit is set.
    pub fn is_owned(self) -> bool {
        (self.0 & Self::OWNED) != 0
    }

    /// Sets or clears the owned bit.
    pub fn set_owned(&mut self, owned: bool) {
        if owned {
            self.0 |= Self::OWNED;
        } else {
            self.0 &= !Self::OWNED;
        }
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
