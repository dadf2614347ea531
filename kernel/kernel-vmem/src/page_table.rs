//! # Page Tables
//!
//! One 4 KiB-aligned table of 512 eight-byte entries, the same shape at
//! every level of the hierarchy. An entry either links the next-lower table
//! (non-leaf) or maps a 4 KiB physical page (leaf in the PT); this core
//! never installs large-page leaves, so bit 7 (PS) stays clear in the
//! tables it builds.

use bitfield_struct::bitfield;

/// Entries per table at every level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// An x86-64 page-table entry.
///
/// The physical address bits (51:12) are exposed through
/// [`addr`](Self::addr)/[`set_addr`](Self::set_addr) rather than the raw
/// 40-bit frame field.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Bit 0 — P: translation is present.
    pub present: bool,

    /// Bit 1 — R/W: writes allowed. Cleared means read-only; writes fault
    /// (supervisor writes too, once CR0.WP is set).
    pub writable: bool,

    /// Bit 2 — U/S: accessible from user mode.
    pub user: bool,

    /// Bit 3 — PWT: write-through caching.
    pub write_through: bool,

    /// Bit 4 — PCD: caching disabled; required for MMIO pages.
    pub cache_disable: bool,

    /// Bit 5 — A: set by the CPU on first access.
    pub accessed: bool,

    /// Bit 6 — D: set by the CPU on first write (leaf entries).
    pub dirty: bool,

    /// Bit 7 — PS: large-page leaf at PDPT/PD level. Always clear here.
    pub ps: bool,

    /// Bit 8 — G: translation survives CR3 reloads (with CR4.PGE).
    pub global: bool,

    /// Bits 9–11 — ignored by hardware.
    #[bits(3)]
    avl_low: u8,

    /// Bits 12–51 — physical frame number (physical address >> 12).
    #[bits(40)]
    frame: u64,

    /// Bits 52–62 — ignored by hardware.
    #[bits(11)]
    avl_high: u16,

    /// Bit 63 — XD: no-execute when EFER.NXE is enabled.
    pub nx: bool,
}

impl PageTableEntry {
    /// Physical address this entry references (table frame or mapped page).
    #[inline]
    #[must_use]
    pub const fn addr(self) -> u64 {
        self.frame() << 12
    }

    /// Point the entry at a 4 KiB-aligned physical address.
    #[inline]
    pub fn set_addr(&mut self, pa: u64) {
        debug_assert!(pa & 0xfff == 0, "entry target must be 4K-aligned");
        self.set_frame(pa >> 12);
    }

    /// Builder-style variant of [`set_addr`](Self::set_addr).
    #[inline]
    #[must_use]
    pub const fn with_addr(self, pa: u64) -> Self {
        debug_assert!(pa & 0xfff == 0, "entry target must be 4K-aligned");
        self.with_frame(pa >> 12)
    }
}

/// One page table: 512 entries, 4 KiB, naturally aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = {
    assert!(core::mem::size_of::<PageTable>() == 4096);
    assert!(core::mem::align_of::<PageTable>() == 4096);
};

impl PageTable {
    /// Clear every entry.
    pub fn zero(&mut self) {
        self.entries = [PageTableEntry::new(); ENTRIES_PER_TABLE];
    }

    /// Read the entry at `idx`.
    #[inline]
    #[must_use]
    pub fn entry(&self, idx: usize) -> PageTableEntry {
        self.entries[idx]
    }

    /// Mutable access to the entry at `idx`.
    #[inline]
    pub fn entry_mut(&mut self, idx: usize) -> &mut PageTableEntry {
        &mut self.entries[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrips_address_and_flags() {
        let mut e = PageTableEntry::new()
            .with_present(true)
            .with_writable(true)
            .with_addr(0x0000_0012_3456_7000);
        assert!(e.present());
        assert!(e.writable());
        assert!(!e.ps());
        assert_eq!(e.addr(), 0x0000_0012_3456_7000);

        e.set_writable(false);
        assert!(!e.writable());
        assert_eq!(e.addr(), 0x0000_0012_3456_7000, "flag edit keeps the frame");
    }

    #[test]
    fn zeroed_entry_is_not_present() {
        let e = PageTableEntry::new();
        assert_eq!(e.into_bits(), 0);
        assert!(!e.present());
    }
}
