//! # Virtual Memory Bootstrap
//!
//! Everything needed to stand up the kernel's own x86-64 translation
//! hierarchy from a reserved pool of physical frames:
//!
//! - A one-shot, zero-filling [`FramePool`] bump allocator.
//! - [`PhysAddr`]/[`VirtAddr`] newtypes so address kinds don't mix.
//! - A 4 KiB-aligned [`PageTable`] and its [`PageTableEntry`] bitfield.
//! - An [`AddressSpace`] that lazily materializes table levels, maps page
//!   ranges (plain or into named-region windows), and resolves live leaf
//!   entries for the post-install hardening pass.
//! - The [`PhysMapper`]/[`FrameSource`]/[`TlbFlush`] seams that keep the
//!   walk testable on a host.
//!
//! ## Virtual address → physical address walk
//!
//! Each 48-bit virtual address splits into four 9-bit table indices plus a
//! 12-bit page offset:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! The PML4 frame is the translation root (loaded into CR3 once the whole
//! hierarchy is built); each level's entry points at the next level's
//! frame, and the PT entry is the 4 KiB leaf. This core maps 4 KiB pages
//! exclusively.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod address_space;
mod addresses;
mod frame_pool;
mod page_table;

pub use crate::address_space::{AddressSpace, MapError, RegionWindow, ResolveError};
pub use crate::addresses::{PhysAddr, VirtAddr, align_down, align_up};
pub use crate::frame_pool::{FramePool, FramePoolExhausted, FrameSource};
pub use crate::page_table::{ENTRIES_PER_TABLE, PageTable, PageTableEntry};

/// Re-export the fixed virtual-address layout.
pub use kernel_info::layout;
pub use kernel_info::layout::PAGE_SIZE;

bitflags::bitflags! {
    /// Caller-selectable leaf mapping attributes.
    ///
    /// `PRESENT` is implied by mapping; `PS` never appears (4 KiB leaves
    /// only). Bit positions match the hardware entry layout.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct MapFlags: u64 {
        /// Writes allowed. Clear for read-only mappings.
        const WRITABLE      = 1 << 1;

        /// Accessible from user mode. Never set during bootstrap.
        const USER          = 1 << 2;

        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;

        /// Caching disabled; use for device MMIO pages.
        const CACHE_DISABLE = 1 << 4;

        /// Translation survives CR3 reloads (kernel mappings).
        const GLOBAL        = 1 << 8;

        /// No-execute.
        const NX            = 1 << 63;
    }
}

/// Converts physical addresses to usable pointers in the *current* virtual
/// address space.
///
/// During construction the boot stage's identity mapping is live, so the
/// kernel's implementation returns the physical address as a pointer; after
/// the switch, table frames are reached through the page-table pool window.
/// Tests back this with a simulated RAM.
///
/// # Safety
/// - `pa` must be mapped writable in the current tables for `&mut T`.
/// - `T` must match the bytes at `pa`, and the mapping must outlive the
///   returned borrow.
pub trait PhysMapper {
    /// Convert a physical address to a mutable reference in the current
    /// address space.
    ///
    /// # Safety
    /// See the trait-level contract.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T;
}

/// Forgets one cached virtual-to-physical translation.
///
/// Required immediately after an in-place permission change on a live
/// mapping; the hardening pass flushes page by page, never batched. The
/// kernel implements this with `invlpg`; tests record the flushed
/// addresses instead.
pub trait TlbFlush {
    /// Invalidate the cached translation for the page containing `va`.
    fn flush_page(&mut self, va: VirtAddr);
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{PhysAddr, PhysMapper};

    /// A 4 KiB-aligned raw frame backing the simulated physical RAM.
    #[repr(align(4096))]
    pub struct Aligned4K([u8; 4096]);

    impl Aligned4K {
        fn new_zeroed() -> Self {
            Self([0u8; 4096])
        }
    }

    /// Simulated physical memory: `n` frames starting at physical `base`.
    ///
    /// The mapper turns a physical address into a reference by picking the
    /// frame `(pa - base) / 4096`. Only for tests; the real mappers honor
    /// whatever identity/window mapping is live.
    pub struct TestPhys {
        base: u64,
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            Self::with_base_and_frames(0, n)
        }

        pub fn with_base_and_frames(base: u64, n: usize) -> Self {
            assert_eq!(base % 4096, 0);
            let mut frames = Vec::with_capacity(n);
            for _ in 0..n {
                frames.push(Aligned4K::new_zeroed());
            }
            Self { base, frames }
        }

        fn frame_mut_ptr(&self, idx: usize) -> *mut u8 {
            (&raw const self.frames[idx]).cast::<u8>().cast_mut()
        }

        /// Scribble over the whole simulated RAM.
        pub fn fill(&self, byte: u8) {
            for idx in 0..self.frames.len() {
                unsafe {
                    core::ptr::write_bytes(self.frame_mut_ptr(idx), byte, 4096);
                }
            }
        }

        /// Read back the frame containing `pa`.
        pub fn frame_bytes(&self, pa: PhysAddr) -> &[u8; 4096] {
            let idx = ((pa.as_u64() - self.base) >> 12) as usize;
            unsafe { &*self.frame_mut_ptr(idx).cast::<[u8; 4096]>() }
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
            let idx = ((pa.as_u64() - self.base) >> 12) as usize;
            let off = (pa.as_u64() & 0xfff) as usize;
            // Page tables and pool frames are whole pages; catch misuse.
            debug_assert_eq!(off, 0);

            // SAFETY: the caller promises `T` matches the bytes in the frame.
            unsafe { &mut *self.frame_mut_ptr(idx).cast::<T>() }
        }
    }
}
