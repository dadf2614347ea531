//! # Image Section Protector
//!
//! Late-init hardening of the kernel's own image, after every mapping is
//! final and the new translation root is live. Discardable sections carried
//! relocation/startup metadata that is no longer needed: their whole range
//! is zeroed. Sections without the write characteristic become read-only in
//! the live tables, one page at a time, each permission flip followed
//! immediately by its own translation-cache invalidation so no stale cached
//! entry keeps permitting writes.
//!
//! This pass runs exactly once. It necessarily executes while its own code
//! is still writable-through-the-tables it is editing; once it completes,
//! the image's immutable ranges can no longer be modified.

use crate::pe::{ImageError, SectionFlags, section_table};
use kernel_vmem::layout::PAGE_SIZE;
use kernel_vmem::{AddressSpace, PhysMapper, ResolveError, TlbFlush, VirtAddr};
use log::info;

/// What the hardening pass did, for the boot log.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ProtectStats {
    /// Sections whose contents were zeroed.
    pub sections_discarded: u32,
    /// Total bytes zeroed across discardable sections.
    pub bytes_zeroed: u64,
    /// Pages whose entries lost the writable bit.
    pub pages_protected: u64,
}

/// The hardening pass failed; both variants are boot-fatal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProtectError {
    /// The image headers don't parse.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// A section page had no live translation: the kernel region was not
    /// fully mapped, which is a logic error in the init sequence.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Walk the image's section table in file order and apply the hardening
/// rules above.
///
/// # Safety
/// - `image_base` must be the virtual base of the running kernel image,
///   fully mapped (headers and all sections).
/// - `aspace` must be the **live** address space; permission edits take
///   effect immediately.
/// - Must be called once, after all mappings are installed.
///
/// # Errors
/// [`ProtectError`]; the caller halts on either variant.
pub unsafe fn protect_image<M: PhysMapper, T: TlbFlush>(
    image_base: VirtAddr,
    aspace: &AddressSpace<'_, M>,
    tlb: &mut T,
) -> Result<ProtectStats, ProtectError> {
    let sections = unsafe { section_table(image_base.as_u64() as *const u8)? };

    let mut stats = ProtectStats::default();
    for section in sections {
        let flags = section.flags();
        let start = image_base + u64::from(section.virtual_address);
        let size = u64::from(section.virtual_size);

        if flags.contains(SectionFlags::DISCARDABLE) {
            info!("zeroing section {} at {start} ({size} bytes)", section.name());
            unsafe {
                core::ptr::write_bytes(start.as_u64() as *mut u8, 0, size as usize);
            }
            stats.sections_discarded += 1;
            stats.bytes_zeroed += size;
        } else if !flags.contains(SectionFlags::WRITE) {
            let pages = size.div_ceil(PAGE_SIZE);
            info!(
                "write-protecting section {} at {start} ({pages} pages)",
                section.name()
            );
            debug_assert!(start.is_page_aligned(), "sections are page-aligned in memory");

            let mut va = start;
            for _ in 0..pages {
                let entry = aspace.resolve(va)?;
                entry.set_writable(false);
                // Per page, immediately: a batched flush would leave a
                // window where a stale cached translation still permits a
                // write.
                tlb.flush_page(va);
                va += PAGE_SIZE;
                stats.pages_protected += 1;
            }
        }
    }
    Ok(stats)
}
