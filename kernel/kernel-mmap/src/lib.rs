//! # Firmware Memory Map
//!
//! The UEFI memory map survives `ExitBootServices` as a raw byte buffer of
//! descriptors whose element size is only known at run time (firmware may
//! grow the descriptor forward-compatibly). This crate walks that buffer
//! with the firmware-provided stride and identity-maps every range the
//! firmware still needs after the handoff, so runtime-service calls keep
//! working once the kernel's own translation root is live.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

use kernel_info::boot::MemoryMapInfo;
use kernel_vmem::{AddressSpace, FrameSource, MapError, MapFlags, PhysAddr, PhysMapper, VirtAddr};
use log::{debug, info};

/// One contiguous physical range reported by firmware.
///
/// Matches `EFI_MEMORY_DESCRIPTOR`. The buffer stride is
/// [`MemoryMapInfo::mmap_desc_size`], which may exceed
/// `size_of::<MemoryDescriptor>()`; never walk by the compiled-in size.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct MemoryDescriptor {
    /// `EFI_MEMORY_TYPE` of the range.
    pub kind: u32,

    /// Physical start, 4 KiB aligned.
    pub physical_start: u64,

    /// Virtual start as assigned by firmware, if any. Informational here;
    /// the runtime policy below maps identity regardless.
    pub virtual_start: u64,

    /// Number of 4 KiB pages.
    pub page_count: u64,

    /// `EFI_MEMORY_*` attribute bits.
    pub attribute: u64,
}

/// Range must stay mapped for firmware runtime services
/// (`EFI_MEMORY_RUNTIME`).
pub const MEMORY_RUNTIME: u64 = 1 << 63;

/// Lazy walk over the raw descriptor buffer.
///
/// Finite and stride-aware; a fresh walk from [`descriptors`] restarts the
/// traversal, and `Clone` snapshots a position mid-walk.
#[derive(Clone)]
pub struct DescriptorIter<'a> {
    cursor: *const u8,
    end: *const u8,
    stride: usize,
    _map: core::marker::PhantomData<&'a MemoryMapInfo>,
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = &'a MemoryDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        // SAFETY: the boot stage guarantees `mmap_len` bytes of descriptors
        // at `mmap_ptr`, each `stride` bytes apart and at least a
        // `MemoryDescriptor` long.
        let desc = unsafe { &*self.cursor.cast::<MemoryDescriptor>() };
        self.cursor = unsafe { self.cursor.add(self.stride) };
        Some(desc)
    }
}

/// Iterate the descriptors of a captured memory map.
///
/// # Panics
/// Debug-asserts that the advertised stride can hold a descriptor.
#[must_use]
pub fn descriptors(map: &MemoryMapInfo) -> DescriptorIter<'_> {
    let stride = map.mmap_desc_size as usize;
    debug_assert!(stride >= core::mem::size_of::<MemoryDescriptor>());

    let base = map.mmap_ptr as *const u8;
    DescriptorIter {
        cursor: base,
        // Partial trailing records (len not a stride multiple) are not
        // yielded.
        end: unsafe { base.add((map.mmap_len as usize / stride) * stride) },
        stride,
        _map: core::marker::PhantomData,
    }
}

/// Identity-map every firmware-runtime range into `aspace`.
///
/// The policy applied here is `va == pa` for each descriptor carrying
/// [`MEMORY_RUNTIME`], sized to its `page_count`. Must run to completion
/// before the new translation root is installed; a runtime-service call
/// through an unmapped range afterwards would fault.
///
/// Returns the total number of pages mapped.
///
/// # Errors
/// Propagates [`MapError`] from the mapper (pool exhaustion is boot-fatal
/// at the caller).
pub fn map_runtime_regions<M: PhysMapper, F: FrameSource>(
    aspace: &AddressSpace<'_, M>,
    frames: &mut F,
    map: &MemoryMapInfo,
) -> Result<u64, MapError> {
    let mut pages = 0;
    for desc in descriptors(map).filter(|d| d.attribute & MEMORY_RUNTIME != 0) {
        debug!(
            "runtime range: pa={:#012x} pages={} attr={:#x}",
            desc.physical_start, desc.page_count, desc.attribute
        );
        aspace.map(
            frames,
            VirtAddr::new(desc.physical_start),
            PhysAddr::new(desc.physical_start),
            desc.page_count,
            MapFlags::WRITABLE | MapFlags::GLOBAL,
        )?;
        pages += desc.page_count;
    }
    info!("firmware runtime ranges identity-mapped ({pages} pages)");
    Ok(pages)
}

/// Dump the whole map to the diagnostic sink.
pub fn log_descriptors(map: &MemoryMapInfo) {
    debug!("==== MEMORY MAP ====");
    for (i, desc) in descriptors(map).enumerate() {
        debug!(
            "[{i}]: type: {} pa: {:#012x} va: {:#012x} (pages: {}) attr {:#x}",
            desc.kind, desc.physical_start, desc.virtual_start, desc.page_count, desc.attribute
        );
    }
    debug!("====================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::{FramePool, PageTableEntry, layout::PAGE_SIZE};

    /// Descriptor stride as QEMU/OVMF reports it: larger than the struct.
    const STRIDE: usize = 48;

    fn build_map(descs: &[MemoryDescriptor]) -> (Vec<u8>, MemoryMapInfo) {
        let mut buf = vec![0u8; descs.len() * STRIDE];
        for (i, d) in descs.iter().enumerate() {
            unsafe {
                buf.as_mut_ptr()
                    .add(i * STRIDE)
                    .cast::<MemoryDescriptor>()
                    .write_unaligned(*d);
            }
        }
        let info = MemoryMapInfo {
            mmap_ptr: buf.as_ptr() as u64,
            mmap_len: buf.len() as u64,
            mmap_desc_size: STRIDE as u64,
            mmap_desc_version: 1,
        };
        (buf, info)
    }

    #[test]
    fn iterator_honors_firmware_stride() {
        let (_buf, info) = build_map(&[
            MemoryDescriptor {
                kind: 7,
                physical_start: 0x1000,
                virtual_start: 0,
                page_count: 1,
                attribute: 0,
            },
            MemoryDescriptor {
                kind: 11,
                physical_start: 0x8000_0000,
                virtual_start: 0x8000_0000,
                page_count: 10,
                attribute: MEMORY_RUNTIME,
            },
        ]);

        let got: Vec<_> = descriptors(&info)
            .map(|d| (d.kind, d.physical_start, d.page_count))
            .collect();
        assert_eq!(got, [(7, 0x1000, 1), (11, 0x8000_0000, 10)]);

        // Restartable: a fresh walk sees the same sequence.
        assert_eq!(descriptors(&info).count(), 2);
    }

    /// Simulated physical RAM, same shape as the kernel-vmem test harness.
    #[repr(align(4096))]
    struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

    struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        fn with_frames(n: usize) -> Self {
            let mut frames = Vec::with_capacity(n);
            for _ in 0..n {
                frames.push(Aligned4K([0u8; 4096]));
            }
            Self { frames }
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
            let idx = (pa.as_u64() >> 12) as usize;
            debug_assert_eq!(pa.as_u64() & 0xfff, 0);
            unsafe {
                &mut *(&raw const self.frames[idx]).cast::<u8>().cast_mut().cast::<T>()
            }
        }
    }

    #[test]
    fn runtime_ranges_get_identity_mapped() {
        let phys = TestPhys::with_frames(64);
        let mut pool = FramePool::new(&phys, PhysAddr::new(0), 64);
        let root = pool.alloc_frame().unwrap();
        let aspace = AddressSpace::new(&phys, root);

        let (_buf, info) = build_map(&[
            MemoryDescriptor {
                kind: 11,
                physical_start: 0x8000_0000,
                virtual_start: 0x8000_0000,
                page_count: 10,
                attribute: MEMORY_RUNTIME,
            },
            MemoryDescriptor {
                kind: 7,
                physical_start: 0x9000_0000,
                virtual_start: 0,
                page_count: 4,
                attribute: 0,
            },
        ]);

        let pages = map_runtime_regions(&aspace, &mut pool, &info).unwrap();
        assert_eq!(pages, 10);

        for k in 0..10u64 {
            let va = VirtAddr::new(0x8000_0000 + k * PAGE_SIZE);
            let entry: &PageTableEntry = aspace.resolve(va).unwrap();
            assert_eq!(entry.addr(), 0x8000_0000 + k * PAGE_SIZE, "identity");
        }

        // The non-runtime descriptor produced no mapping at all.
        assert!(aspace.translate(VirtAddr::new(0x9000_0000)).is_none());
    }
}
