//! # Boot Handoff Record

/// Kernel entry function pointer.
///
/// # ABI
/// The ABI is defined as `win64` since the kernel image is a PE/COFF
/// executable entered from a UEFI (PE/COFF) boot stage.
pub type KernelEntryFn = extern "win64" fn(*const BootHandoff) -> !;

/// Everything the kernel needs right after `ExitBootServices`.
///
/// Consumed exactly once by early init. The physical region backing this
/// record is boot-stage memory and is reclaimed once the firmware memory
/// map has been walked, so the kernel copies out whatever it keeps before
/// building its own page tables.
///
/// Keep this `#[repr(C)]` and prefer fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Clone)]
pub struct BootHandoff {
    /// Memory map information.
    pub mmap: MemoryMapInfo,

    /// Where the boot stage placed the kernel image.
    pub kernel: KernelImageInfo,

    /// Framebuffer information, passed from UEFI GOP.
    pub fb: FramebufferInfo,

    /// Physical region reserved for the kernel's page-table frames.
    pub page_pool: FramePoolInfo,

    /// RSDP (ACPI 2.0+) physical address, or 0 if not provided.
    pub rsdp_addr: u64,

    /// HPET MMIO block physical address, or 0 if not present.
    pub hpet: u64,

    /// Local APIC MMIO page physical address.
    pub lapic: u64,

    /// I/O APIC MMIO page physical address.
    pub ioapic: u64,

    /// Non-zero when firmware advertises a PS/2 (i8042) controller.
    pub i8042: u8,
}

/// Raw UEFI memory map as captured at `ExitBootServices`.
#[repr(C)]
#[derive(Clone)]
pub struct MemoryMapInfo {
    /// Pointer to the raw UEFI memory map buffer (array of
    /// `EFI_MEMORY_DESCRIPTOR` bytes).
    pub mmap_ptr: u64,

    /// Length of the memory map buffer in **bytes**.
    pub mmap_len: u64,

    /// Size of a single memory descriptor in bytes. Firmware may grow the
    /// descriptor forward-compatibly, so walks must use this stride and
    /// never a compiled-in element size.
    pub mmap_desc_size: u64,

    /// Descriptor version (from UEFI). Kernel can check it matches expectations.
    pub mmap_desc_version: u32,
}

/// Placement of the kernel image itself.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct KernelImageInfo {
    /// Physical base the image bytes were loaded at.
    pub physical_base: u64,

    /// Virtual base the image was linked against.
    pub virtual_base: u64,

    /// Image size in **bytes** (headers + all sections).
    pub size: u64,
}

/// Linear framebuffer, passed from UEFI GOP.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct FramebufferInfo {
    /// Framebuffer base (CPU physical address). Valid to write after
    /// `ExitBootServices`.
    pub framebuffer_ptr: u64,

    /// Total framebuffer size in **bytes**.
    pub framebuffer_size: u64,

    /// Visible width in **pixels**.
    pub framebuffer_width: u64,

    /// Visible height in **pixels**.
    pub framebuffer_height: u64,

    /// Pixels per scanline (a.k.a. stride). May be >= width due to padding.
    pub framebuffer_stride: u64,
}

/// Contiguous physical region reserved by the boot stage for page-table
/// frames. The kernel's frame pool consumes it strictly forward.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct FramePoolInfo {
    /// Page-aligned physical base of the reserved region.
    pub base: u64,

    /// Number of 4 KiB pages in the region.
    pub page_count: u64,
}
