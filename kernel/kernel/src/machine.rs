//! # Machine Context
//!
//! Everything early init discovers or decides about this machine, gathered
//! in one value with a single-construction lifecycle: [`crate::init`]
//! builds it exactly once, and later subsystems take it by reference. No
//! ambient statics.

use kernel_vmem::{PhysAddr, VirtAddr};

/// The machine state produced by the init sequence.
pub struct Machine {
    /// Physical address of the live PML4 root. Read-only by convention
    /// from the moment it is installed.
    pub translation_root: PhysAddr,

    /// Framebuffer base inside the framebuffer region.
    pub framebuffer: VirtAddr,

    /// Usable framebuffer size in bytes (the mapped window is larger).
    pub framebuffer_size: u64,

    /// HPET MMIO window, when firmware provided one.
    pub hpet: Option<VirtAddr>,

    /// Local APIC MMIO window.
    pub lapic: VirtAddr,

    /// I/O APIC MMIO window.
    pub ioapic: VirtAddr,

    /// Whether a PS/2 (i8042) controller is present.
    pub i8042: bool,

    /// RSDP physical address, for the ACPI work that comes after this core.
    pub rsdp_addr: u64,
}
