//! # Physical Frame Views
//!
//! The mapper seam has two kernel-side implementations, one per bootstrap
//! phase. Before the new root is installed, the boot stage's tables are
//! live and physical memory is identity-mapped, so a physical address *is*
//! a pointer. Afterwards only the page-table pool window reaches the table
//! frames.

use kernel_vmem::layout;
use kernel_vmem::{PhysAddr, PhysMapper};

/// Identity view, valid while the boot stage's tables are live.
pub struct BootPhysMapper;

impl PhysMapper for BootPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        unsafe { &mut *(pa.as_u64() as *mut T) }
    }
}

/// Pool-window view, valid once the kernel's own root is installed. Only
/// frames inside the reserved pool are reachable, which is all the
/// hierarchy walk ever touches.
pub struct PoolPhysMapper {
    pool_phys_base: u64,
}

impl PoolPhysMapper {
    #[must_use]
    pub const fn new(pool_phys_base: PhysAddr) -> Self {
        Self {
            pool_phys_base: pool_phys_base.as_u64(),
        }
    }
}

impl PhysMapper for PoolPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
        let offset = pa.as_u64() - self.pool_phys_base;
        debug_assert!(
            offset < layout::PAGE_POOL.size_bytes(),
            "frame outside the page-table pool window"
        );
        unsafe { &mut *((layout::PAGE_POOL.base + offset) as *mut T) }
    }
}
