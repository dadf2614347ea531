//! # Init Sequence
//!
//! Single thread of control, interrupts masked, no suspension points. The
//! one ordering invariant enforced here: the new translation root is
//! installed only after every mapping the currently executing code, stack,
//! and data need already exists in the new hierarchy, and the image
//! hardening pass runs only after that install.

use crate::machine::Machine;
use crate::mappers::{BootPhysMapper, PoolPhysMapper};
use kernel_image::{ProtectError, protect_image};
use kernel_info::BootHandoff;
use kernel_qemu::QemuLogger;
use kernel_registers::{Cr3, PageInvalidator, idle, mask_interrupts, unmask_interrupts};
use kernel_vmem::layout::{self, PAGE_SIZE};
use kernel_vmem::{
    AddressSpace, FramePool, FramePoolExhausted, FrameSource, MapError, MapFlags, PhysAddr,
    RegionWindow, VirtAddr, align_up,
};
use log::{LevelFilter, debug, error, info, warn};

/// Anything that can go wrong during the sequence. All of it is fatal;
/// [`run`] logs and halts.
#[derive(Debug, thiserror::Error)]
enum InitError {
    #[error(transparent)]
    Frames(#[from] FramePoolExhausted),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Protect(#[from] ProtectError),
}

/// An optional device the firmware did not report. The only non-fatal
/// error in this core: logged, and the dependent init is skipped.
#[derive(Debug, thiserror::Error)]
#[error("no PS/2 controller present")]
struct DeviceAbsent;

/// Flags for device MMIO windows.
const MMIO_FLAGS: MapFlags = MapFlags::WRITABLE
    .union(MapFlags::GLOBAL)
    .union(MapFlags::CACHE_DISABLE)
    .union(MapFlags::NX);

/// Run the whole sequence and enter the idle loop, or halt on failure.
pub fn run(handoff: &BootHandoff) -> ! {
    // Best effort; if the logger cannot be installed we boot dark.
    let _ = QemuLogger::new(LevelFilter::Debug).init();
    info!("kernel early init");

    match build(handoff) {
        Ok(machine) => {
            // The hierarchy is immutable from here on; interrupt handlers
            // (outside this core) may now observe it.
            unmask_interrupts();
            info!(
                "init complete (root {}), entering idle",
                machine.translation_root
            );
            idle()
        }
        Err(err) => fatal(&err),
    }
}

fn fatal(err: &InitError) -> ! {
    error!("early init failed: {err}");
    mask_interrupts();
    loop {
        kernel_registers::halt();
    }
}

/// Build the address space, install it, harden the image, probe optional
/// devices. Returns the machine context for whatever comes after.
fn build(handoff: &BootHandoff) -> Result<Machine, InitError> {
    // Copy out what we keep: the handoff's backing region is boot-stage
    // memory, reclaimed once the firmware memory map has been walked.
    let mmap = handoff.mmap.clone();
    let kernel = handoff.kernel;
    let fb = handoff.fb;
    let pool_info = handoff.page_pool;

    kernel_mmap::log_descriptors(&mmap);

    // The frame pool's first allocation becomes the translation root.
    let boot_view = BootPhysMapper;
    let mut pool = FramePool::new(&boot_view, PhysAddr::new(pool_info.base), pool_info.page_count);
    let root = pool.alloc_frame()?;
    let aspace = AddressSpace::new(&boot_view, root);

    // Kernel image: writable for now; the hardening pass demotes the
    // read-only sections once init is done with them.
    let kernel_pages = align_up(kernel.size, PAGE_SIZE) / PAGE_SIZE;
    info!(
        "mapping kernel image: pa {:#012x} -> va {:#018x} ({kernel_pages} pages)",
        kernel.physical_base, kernel.virtual_base
    );
    aspace.map(
        &mut pool,
        VirtAddr::new(kernel.virtual_base),
        PhysAddr::new(kernel.physical_base),
        kernel_pages,
        MapFlags::WRITABLE | MapFlags::GLOBAL,
    )?;

    // Page-table pool window: keeps the table frames reachable once the
    // boot stage's identity map is gone.
    aspace.map(
        &mut pool,
        VirtAddr::new(layout::PAGE_POOL.base),
        PhysAddr::new(pool_info.base),
        pool_info.page_count,
        MapFlags::WRITABLE | MapFlags::GLOBAL | MapFlags::NX,
    )?;

    // Framebuffer: map the region's whole window, not just the reported
    // size (see the layout note about hypervisors faulting past the end).
    let mut fb_window = RegionWindow::new(layout::FRAMEBUFFER);
    let fb_va = aspace.map_region(
        &mut pool,
        &mut fb_window,
        PhysAddr::new(fb.framebuffer_ptr),
        layout::FRAMEBUFFER.pages,
        MapFlags::WRITABLE | MapFlags::GLOBAL | MapFlags::WRITE_THROUGH | MapFlags::NX,
    )?;

    // Device MMIO windows, one page each, in request order.
    let mut devices = RegionWindow::new(layout::DEVICE_MMIO);
    let hpet = if handoff.hpet == 0 {
        warn!("no HPET reported, timer setup will fall back");
        None
    } else {
        Some(aspace.map_region(&mut pool, &mut devices, PhysAddr::new(handoff.hpet), 1, MMIO_FLAGS)?)
    };
    let lapic =
        aspace.map_region(&mut pool, &mut devices, PhysAddr::new(handoff.lapic), 1, MMIO_FLAGS)?;
    let ioapic =
        aspace.map_region(&mut pool, &mut devices, PhysAddr::new(handoff.ioapic), 1, MMIO_FLAGS)?;

    // Firmware runtime ranges must be in place before the root switches;
    // a runtime-service call afterwards would otherwise fault.
    kernel_mmap::map_runtime_regions(&aspace, &mut pool, &mmap)?;

    info!(
        "page-table pool: {}/{} frames used",
        pool.used(),
        pool.capacity()
    );

    // The point of no return: everything the running code needs is mapped.
    unsafe {
        Cr3::from_root(root).install();
    }
    info!("translation root installed");

    // From here the pool window is the only path to the table frames.
    let pool_view = PoolPhysMapper::new(PhysAddr::new(pool_info.base));
    let live = AddressSpace::new(&pool_view, root);
    let mut invalidator = PageInvalidator;
    let stats = unsafe {
        protect_image(VirtAddr::new(kernel.virtual_base), &live, &mut invalidator)?
    };
    info!(
        "image hardened: {} sections zeroed ({} bytes), {} pages write-protected",
        stats.sections_discarded, stats.bytes_zeroed, stats.pages_protected
    );

    match probe_i8042(handoff) {
        Ok(()) => debug!("PS/2 controller present"),
        Err(err) => warn!("{err}, skipping PS/2 setup"),
    }

    Ok(Machine {
        translation_root: root,
        framebuffer: fb_va,
        framebuffer_size: fb.framebuffer_size,
        hpet,
        lapic,
        ioapic,
        i8042: handoff.i8042 != 0,
        rsdp_addr: handoff.rsdp_addr,
    })
}

fn probe_i8042(handoff: &BootHandoff) -> Result<(), DeviceAbsent> {
    if handoff.i8042 == 0 {
        Err(DeviceAbsent)
    } else {
        Ok(())
    }
}
