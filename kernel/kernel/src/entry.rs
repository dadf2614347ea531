//! # Kernel Entry Point

use kernel_info::BootHandoff;

/// Boot stack size.
const BOOT_STACK_SIZE: usize = 64 * 1024;

/// 16-byte aligned stack storage.
#[repr(align(16))]
struct Aligned<const N: usize>([u8; N]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned<BOOT_STACK_SIZE> = Aligned([0; BOOT_STACK_SIZE]);

/// The kernel entry point.
///
/// # UEFI Interaction
/// The boot stage jumps here after `ExitBootServices`.
///
/// # ABI
/// The ABI is defined as `win64` since the kernel is entered from a UEFI
/// (PE/COFF) boot stage. This passes the handoff pointer in `RCX`
/// (as opposed to `RDI` for the SysV ABI).
///
/// # Naked function & Stack
/// Naked so we can set up our own stack: without it the compiler would
/// assume a valid C call frame already exists, and replacing `RSP` out from
/// under it would be UB. Interrupts are masked first thing and stay masked
/// for the whole init sequence.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "win64" fn _start_kernel(_handoff: *const BootHandoff) {
    core::arch::naked_asm!(
        "cli",

        // save RCX (handoff pointer per win64)
        "mov r12, rcx",

        // Build our own kernel stack and establish a valid call frame
        "lea rax, [rip + {stack_sym}]",
        "add rax, {stack_size}",
        // Align down to 16
        "and rax, -16",
        // Reserve 32-byte shadow space
        "sub rax, 32",
        "mov rsp, rax",
        // Emulate a CALL by pushing a dummy return address (so RSP % 16 == 8 at entry)
        "push 0",
        "xor rbp, rbp",

        // Handoff pointer into the SysV/C ABI arg register
        "mov rdi, r12",

        // Jump to the Rust entry and never return
        "jmp {rust_entry}",
        stack_sym = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        rust_entry = sym kernel_entry,
    );
}

/// Rust entry running on the boot stack.
///
/// `no_mangle` so [`_start_kernel`] can jump to it by name; C ABI to match
/// the register state the stub leaves behind.
#[unsafe(no_mangle)]
extern "C" fn kernel_entry(handoff: *const BootHandoff) -> ! {
    // SAFETY: the boot stage passes a valid handoff record and keeps its
    // backing memory intact until the init sequence has copied it out.
    let handoff = unsafe { &*handoff };
    crate::init::run(handoff)
}
