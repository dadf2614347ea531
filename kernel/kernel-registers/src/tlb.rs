//! Translation-cache invalidation.

use kernel_vmem::{TlbFlush, VirtAddr};

/// The real `invlpg`-backed implementation of [`TlbFlush`].
///
/// Used by the image-hardening pass to drop the cached translation for a
/// page right after its permissions change in the live tables.
pub struct PageInvalidator;

impl TlbFlush for PageInvalidator {
    #[inline]
    fn flush_page(&mut self, va: VirtAddr) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
    }
}
