use bitfield_struct::bitfield;
use kernel_vmem::PhysAddr;

/// CR3 — Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Holds the physical base address of the PML4 table and cache-control
/// flags for PML4 walks. Assumes standard 4 KiB alignment and no PCID
/// (CR4.PCIDE = 0).
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2 — Reserved (must be 0).
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3 — PWT: Page-level Write-Through for PML4 accesses.
    pub pwt: bool,

    /// Bit 4 — PCD: Page-level Cache Disable for PML4 accesses.
    pub pcd: bool,

    /// Bits 5–11 — Reserved (must be 0 when written).
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–51 — PML4 physical base >> 12.
    #[bits(40)]
    pml4_base_4k: u64,

    /// Bits 52–63 — Reserved.
    #[bits(12)]
    pub reserved2: u16,
}

impl Cr3 {
    /// Create a `Cr3` value from a PML4 physical base address.
    ///
    /// `root` must be 4 KiB-aligned.
    #[must_use]
    pub fn from_root(root: PhysAddr) -> Self {
        debug_assert_eq!(root.as_u64() & 0xfff, 0, "PML4 base must be 4K-aligned");
        Self::new().with_pml4_base_4k(root.as_u64() >> 12)
    }

    /// Return the full physical address of the PML4 base.
    #[must_use]
    pub fn root(&self) -> PhysAddr {
        PhysAddr::new(self.pml4_base_4k() << 12)
    }

    /// Install this value as the live translation root.
    ///
    /// # Safety
    /// Every mapping required by the currently executing code, stack, and
    /// data must already be present in the hierarchy this value points at;
    /// switching early faults immediately with no recovery. CPL0 only.
    pub unsafe fn install(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }

    /// Read the currently installed translation root.
    ///
    /// # Safety
    /// CPL0 with paging enabled.
    #[must_use]
    pub unsafe fn current() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_roundtrips_through_the_bitfield() {
        let cr3 = Cr3::from_root(PhysAddr::new(0x0012_3456_7000));
        assert_eq!(cr3.root(), PhysAddr::new(0x0012_3456_7000));
        assert!(!cr3.pwt());
        assert!(!cr3.pcd());
        assert_eq!(cr3.into_bits() & 0xfff, 0);
    }
}
