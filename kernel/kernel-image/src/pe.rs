//! # PE32+ Image Views
//!
//! Just enough of the PE/COFF on-disk structures to find the section table
//! of the already-mapped kernel image. Offsets are fixed by the format:
//! the DOS stub points at the NT headers via `e_lfanew`, and the section
//! table starts right after the optional header, whose size the file
//! header declares.

use bitflags::bitflags;

/// `MZ`.
pub const DOS_MAGIC: u16 = 0x5a4d;

/// `PE\0\0`.
pub const NT_SIGNATURE: u32 = 0x0000_4550;

/// The image's headers don't parse; the handoff gave us a bad image base.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ImageError {
    /// The DOS stub magic is not `MZ`.
    #[error("bad DOS magic {0:#06x}")]
    BadDosMagic(u16),

    /// The NT signature is not `PE\0\0`.
    #[error("bad NT signature {0:#010x}")]
    BadNtSignature(u32),
}

/// Legacy DOS stub header; only the magic and the NT-header offset matter.
#[repr(C)]
pub struct DosHeader {
    /// `MZ`.
    pub e_magic: u16,
    pub reserved: [u16; 29],
    /// File offset of the NT headers.
    pub e_lfanew: u32,
}

/// COFF file header.
#[repr(C)]
pub struct FileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

/// NT headers without the variable-size optional header that follows them.
#[repr(C)]
pub struct NtHeaders64 {
    /// `PE\0\0`.
    pub signature: u32,
    pub file_header: FileHeader,
}

/// One section table entry.
#[repr(C)]
pub struct SectionHeader {
    /// Section name, NUL-padded, not guaranteed NUL-terminated.
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}

const _: () = {
    assert!(core::mem::size_of::<DosHeader>() == 64);
    assert!(core::mem::offset_of!(DosHeader, e_lfanew) == 0x3c);
    assert!(core::mem::size_of::<NtHeaders64>() == 24);
    assert!(core::mem::size_of::<SectionHeader>() == 40);
};

bitflags! {
    /// Section characteristics. Only the two bits this core consumes get
    /// names; the rest of the word passes through untouched.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SectionFlags: u32 {
        /// Contents are only needed before/during initialization
        /// (`IMAGE_SCN_MEM_DISCARDABLE`).
        const DISCARDABLE = 0x0200_0000;

        /// Section may be written to (`IMAGE_SCN_MEM_WRITE`).
        const WRITE       = 0x8000_0000;
    }
}

impl SectionHeader {
    /// The characteristics bits this core acts on.
    #[must_use]
    pub const fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.characteristics)
    }

    /// Section name with the NUL padding trimmed.
    #[must_use]
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(8);
        core::str::from_utf8(&self.name[..len]).unwrap_or("<non-utf8>")
    }
}

/// Locate the section table of a PE image mapped at `image_base`.
///
/// # Safety
/// `image_base` must point at a fully mapped PE image: DOS header, NT
/// headers, optional header, and the complete section table must all be
/// readable.
///
/// # Errors
/// [`ImageError`] when either magic check fails.
pub unsafe fn section_table<'a>(image_base: *const u8) -> Result<&'a [SectionHeader], ImageError> {
    let dos = unsafe { &*image_base.cast::<DosHeader>() };
    if dos.e_magic != DOS_MAGIC {
        return Err(ImageError::BadDosMagic(dos.e_magic));
    }

    let nt_ptr = unsafe { image_base.add(dos.e_lfanew as usize) };
    let nt = unsafe { &*nt_ptr.cast::<NtHeaders64>() };
    if nt.signature != NT_SIGNATURE {
        return Err(ImageError::BadNtSignature(nt.signature));
    }

    let first = unsafe {
        nt_ptr
            .add(core::mem::size_of::<NtHeaders64>() + nt.file_header.size_of_optional_header as usize)
            .cast::<SectionHeader>()
    };
    Ok(unsafe {
        core::slice::from_raw_parts(first, nt.file_header.number_of_sections as usize)
    })
}
