//! # Address Space
//!
//! Builds and walks a single PML4-rooted translation hierarchy. Table
//! construction is lazy and path-compressed: an intermediate level is
//! materialized from the frame pool only when a requested range first
//! touches it, and it is linked into its parent before the walk descends.
//!
//! The walk reaches physical table frames through the [`PhysMapper`] seam,
//! so the same code runs against real memory in the kernel and against a
//! simulated RAM in tests.

use crate::layout::PAGE_SIZE;
use crate::{
    FramePoolExhausted, FrameSource, MapFlags, PageTable, PageTableEntry, PhysAddr, PhysMapper,
    VirtAddr,
};
use kernel_info::Region;

/// Mapping failed; both variants are boot-fatal at the call site.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The frame pool ran dry while materializing table levels.
    #[error(transparent)]
    Frames(#[from] FramePoolExhausted),

    /// A named-region window cannot fit the requested page count.
    #[error("region window at 0x{base:016x} cannot fit {pages} more pages", base = .0.base, pages = .1)]
    WindowExhausted(Region, u64),
}

/// Walking an existing translation failed.
///
/// `resolve` is only called for addresses whose mapping is known to exist,
/// so this is a logic error in the init sequence, not a recoverable
/// condition.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// Some level along the walk (or the leaf itself) is absent.
    #[error("no translation installed for {0}")]
    NotMapped(VirtAddr),
}

/// Allocation cursor over one named virtual region.
///
/// Sub-windows are handed out in request order, page-granular, never
/// reused. Lets callers ask for "a window in the device region" without
/// computing raw virtual addresses themselves.
pub struct RegionWindow {
    region: Region,
    used: u64,
}

impl RegionWindow {
    #[must_use]
    pub const fn new(region: Region) -> Self {
        Self { region, used: 0 }
    }

    /// The region this window allocates from.
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Pages still available.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.region.pages - self.used
    }

    /// Reserve `pages` consecutive pages, returning their virtual base.
    fn reserve(&mut self, pages: u64) -> Result<VirtAddr, MapError> {
        if self.used + pages > self.region.pages {
            return Err(MapError::WindowExhausted(self.region, pages));
        }
        let va = VirtAddr::new(self.region.base + self.used * PAGE_SIZE);
        self.used += pages;
        Ok(va)
    }
}

/// Handle to one concrete address space (a PML4 root frame plus the means
/// to reach table frames).
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysAddr,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap an existing root frame. The frame must already be a valid
    /// (possibly empty) table; the pool hands frames out zeroed, so its
    /// first allocation can be used directly.
    #[must_use]
    pub const fn new(mapper: &'m M, root: PhysAddr) -> Self {
        Self { root, mapper }
    }

    /// Physical address of the PML4 root frame.
    #[must_use]
    pub const fn root(&self) -> PhysAddr {
        self.root
    }

    #[inline]
    fn table_mut(&self, pa: PhysAddr) -> &mut PageTable {
        // SAFETY: table frames come from the pool (or are the root) and are
        // reachable through the mapper for the lifetime of the walk.
        unsafe { self.mapper.phys_to_mut::<PageTable>(pa) }
    }

    /// Walk PML4 → PDPT → PD for `va`, materializing missing levels, and
    /// return the PT frame that holds the leaf.
    fn ensure_chain<F: FrameSource>(
        &self,
        frames: &mut F,
        va: VirtAddr,
    ) -> Result<PhysAddr, MapError> {
        let mut table_pa = self.root;
        for index in [va.pml4_index(), va.pdpt_index(), va.pd_index()] {
            let entry = self.table_mut(table_pa).entry_mut(index);
            table_pa = if entry.present() {
                PhysAddr::new(entry.addr())
            } else {
                let frame = frames.alloc_frame()?;
                self.table_mut(frame).zero();
                // Link before descending so the hierarchy is consistent at
                // every step of the walk.
                entry.set_present(true);
                entry.set_writable(true);
                entry.set_addr(frame.as_u64());
                frame
            };
        }
        Ok(table_pa)
    }

    /// Install one 4 KiB leaf `va → pa`.
    fn map_one<F: FrameSource>(
        &self,
        frames: &mut F,
        va: VirtAddr,
        pa: PhysAddr,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        debug_assert!(va.is_page_aligned(), "virtual address must be page-aligned");
        debug_assert!(pa.is_page_aligned(), "physical address must be page-aligned");

        let pt = self.table_mut(self.ensure_chain(frames, va)?);
        *pt.entry_mut(va.pt_index()) = leaf_entry(pa, flags);
        Ok(())
    }

    /// Install `page_count` consecutive leaf mappings starting at
    /// `va → pa`. Both addresses must be page-aligned.
    ///
    /// Mapping is idempotent for identical `(va, pa, flags)` triples; the
    /// repeat call allocates nothing and leaves the entries unchanged.
    /// Re-mapping a virtual address to a *different* physical address is a
    /// caller contract violation and must not occur.
    ///
    /// # Errors
    /// [`MapError::Frames`] when the pool runs dry mid-range.
    pub fn map<F: FrameSource>(
        &self,
        frames: &mut F,
        va: VirtAddr,
        pa: PhysAddr,
        page_count: u64,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        for k in 0..page_count {
            self.map_one(frames, va + k * PAGE_SIZE, pa + k * PAGE_SIZE, flags)?;
        }
        Ok(())
    }

    /// Map `page_count` pages at the next free slot of a named-region
    /// window and return the assigned virtual base.
    ///
    /// # Errors
    /// [`MapError::WindowExhausted`] when the window's capacity would be
    /// exceeded; otherwise as [`map`](Self::map).
    pub fn map_region<F: FrameSource>(
        &self,
        frames: &mut F,
        window: &mut RegionWindow,
        pa: PhysAddr,
        page_count: u64,
        flags: MapFlags,
    ) -> Result<VirtAddr, MapError> {
        let va = window.reserve(page_count)?;
        self.map(frames, va, pa, page_count, flags)?;
        Ok(va)
    }

    /// Walk the existing hierarchy to the leaf entry for `va` without
    /// allocating anything.
    ///
    /// # Errors
    /// [`ResolveError::NotMapped`] when a level along the path (or the leaf
    /// itself) is absent.
    pub fn resolve(&self, va: VirtAddr) -> Result<&mut PageTableEntry, ResolveError> {
        let mut table_pa = self.root;
        for index in [va.pml4_index(), va.pdpt_index(), va.pd_index()] {
            let entry = self.table_mut(table_pa).entry(index);
            if !entry.present() {
                return Err(ResolveError::NotMapped(va));
            }
            table_pa = PhysAddr::new(entry.addr());
        }

        let entry = self.table_mut(table_pa).entry_mut(va.pt_index());
        if entry.present() {
            Ok(entry)
        } else {
            Err(ResolveError::NotMapped(va))
        }
    }

    /// Translate `va` to its physical address, if mapped. Diagnostic-only;
    /// unlike [`resolve`](Self::resolve) an absent mapping is not an error.
    #[must_use]
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        let mut table_pa = self.root;
        for index in [va.pml4_index(), va.pdpt_index(), va.pd_index()] {
            let entry = self.table_mut(table_pa).entry(index);
            if !entry.present() {
                return None;
            }
            table_pa = PhysAddr::new(entry.addr());
        }

        let entry = self.table_mut(table_pa).entry(va.pt_index());
        entry
            .present()
            .then(|| PhysAddr::new(entry.addr() | (va.as_u64() & (PAGE_SIZE - 1))))
    }
}

/// Encode a leaf entry. `PRESENT` is implied; `PS` stays clear (4 KiB PTE).
fn leaf_entry(pa: PhysAddr, flags: MapFlags) -> PageTableEntry {
    PageTableEntry::new()
        .with_present(true)
        .with_writable(flags.contains(MapFlags::WRITABLE))
        .with_user(flags.contains(MapFlags::USER))
        .with_write_through(flags.contains(MapFlags::WRITE_THROUGH))
        .with_cache_disable(flags.contains(MapFlags::CACHE_DISABLE))
        .with_global(flags.contains(MapFlags::GLOBAL))
        .with_nx(flags.contains(MapFlags::NX))
        .with_addr(pa.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FramePool;
    use crate::test_support::TestPhys;

    fn fresh_space<'m>(
        phys: &'m TestPhys,
        pool_pages: u64,
    ) -> (AddressSpace<'m, TestPhys>, FramePool<'m, TestPhys>) {
        let mut pool = FramePool::new(phys, PhysAddr::new(0), pool_pages);
        let root = pool.alloc_frame().unwrap();
        (AddressSpace::new(phys, root), pool)
    }

    #[test]
    fn map_then_resolve_each_page() {
        let phys = TestPhys::with_frames(64);
        let (aspace, mut pool) = fresh_space(&phys, 64);

        let va = VirtAddr::new(0xffff_8000_0000_0000);
        let pa = PhysAddr::new(0x0030_0000);
        aspace.map(&mut pool, va, pa, 3, MapFlags::WRITABLE).unwrap();

        for k in 0..3 {
            let entry = aspace.resolve(va + k * PAGE_SIZE).unwrap();
            assert!(entry.present());
            assert!(entry.writable());
            assert_eq!(entry.addr(), pa.as_u64() + k * PAGE_SIZE);
        }
    }

    #[test]
    fn low_address_single_page() {
        let phys = TestPhys::with_frames(16);
        let (aspace, mut pool) = fresh_space(&phys, 16);

        aspace
            .map(
                &mut pool,
                VirtAddr::new(0x1000),
                PhysAddr::new(0x2000),
                1,
                MapFlags::empty(),
            )
            .unwrap();

        let entry = aspace.resolve(VirtAddr::new(0x1000)).unwrap();
        assert!(entry.present());
        assert_eq!(entry.addr(), 0x2000);
        assert_eq!(
            aspace.translate(VirtAddr::new(0x1234)),
            Some(PhysAddr::new(0x2234))
        );
    }

    #[test]
    fn intermediate_levels_materialize_lazily() {
        let phys = TestPhys::with_frames(16);
        let (aspace, mut pool) = fresh_space(&phys, 16);
        assert_eq!(pool.used(), 1, "only the root so far");

        aspace
            .map(
                &mut pool,
                VirtAddr::new(0x1000),
                PhysAddr::new(0x2000),
                1,
                MapFlags::empty(),
            )
            .unwrap();
        // PDPT + PD + PT on top of the root.
        assert_eq!(pool.used(), 4);

        // A second page in the same PT reuses the whole chain.
        aspace
            .map(
                &mut pool,
                VirtAddr::new(0x2000),
                PhysAddr::new(0x3000),
                1,
                MapFlags::empty(),
            )
            .unwrap();
        assert_eq!(pool.used(), 4);
    }

    #[test]
    fn identical_remap_is_idempotent() {
        let phys = TestPhys::with_frames(16);
        let (aspace, mut pool) = fresh_space(&phys, 16);

        let va = VirtAddr::new(0xffff_a000_0000_0000);
        let pa = PhysAddr::new(0x0040_0000);
        aspace.map(&mut pool, va, pa, 2, MapFlags::WRITABLE | MapFlags::NX).unwrap();
        let used = pool.used();
        let before = *aspace.resolve(va).unwrap();

        aspace.map(&mut pool, va, pa, 2, MapFlags::WRITABLE | MapFlags::NX).unwrap();
        assert_eq!(pool.used(), used, "repeat mapping allocates nothing");
        assert_eq!(*aspace.resolve(va).unwrap(), before);
    }

    #[test]
    fn resolve_without_mapping_fails() {
        let phys = TestPhys::with_frames(8);
        let (aspace, _pool) = fresh_space(&phys, 8);

        let va = VirtAddr::new(0xffff_c000_0000_0000);
        assert_eq!(aspace.resolve(va), Err(ResolveError::NotMapped(va)));
        assert_eq!(aspace.translate(va), None);
    }

    #[test]
    fn region_windows_come_out_in_request_order() {
        let phys = TestPhys::with_frames(32);
        let (aspace, mut pool) = fresh_space(&phys, 32);

        let region = Region::new(0xffff_c000_0000_0000, 4);
        let mut window = RegionWindow::new(region);

        let first = aspace
            .map_region(&mut pool, &mut window, PhysAddr::new(0xfee0_0000), 1, MapFlags::CACHE_DISABLE)
            .unwrap();
        let second = aspace
            .map_region(&mut pool, &mut window, PhysAddr::new(0xfec0_0000), 2, MapFlags::CACHE_DISABLE)
            .unwrap();

        assert_eq!(first.as_u64(), region.base);
        assert_eq!(second.as_u64(), region.base + PAGE_SIZE);
        assert_eq!(window.remaining(), 1);

        assert_eq!(
            aspace.translate(first),
            Some(PhysAddr::new(0xfee0_0000))
        );

        let err = aspace
            .map_region(&mut pool, &mut window, PhysAddr::new(0xfed0_0000), 2, MapFlags::empty())
            .unwrap_err();
        assert_eq!(err, MapError::WindowExhausted(region, 2));
    }
}
