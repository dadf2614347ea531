//! # Kernel Boot Information
//!
//! Shared, dependency-free definitions the boot stage and the kernel agree
//! on: the `#[repr(C)]` handoff record passed at the entry point and the
//! fixed virtual-address layout the rest of the kernel builds against.

#![no_std]
#![deny(unsafe_code)]

pub mod boot;
pub mod layout;

pub use boot::BootHandoff;
pub use layout::Region;
