//! Loader for statically linked, position-independent ELF64 executables.
//!
//! This crate accepts a strict subset of the ELF format: exactly one R-X
//! and one R-W loadable segment, relative relocations only, no legacy
//! constructor sections, x86_64 little-endian SysV only. The strictness
//! is the point: an image that passes validation can be carried into a
//! UEFI module, a kernel driver or a hypervisor and run there without
//! any further OS support.
//!
//! Loading is split in two phases so they can happen in different
//! address spaces:
//!
//! 1. [`ElfFile::parse`] validates the raw file bytes and computes the
//!    contiguous memory footprint. The handle borrows the file.
//! 2. [`ElfFile::load`] copies the image into caller-provided memory and
//!    produces a self-contained [`ElfImage`] descriptor, which can be
//!    persisted, re-attached elsewhere, and relocated with
//!    [`ElfImage::relocate`].
//!
//! ```no_run
//! use skiff_elf::ElfFile;
//!
//! # fn demo(file: &[u8]) -> Result<(), skiff_elf::LoadError> {
//! let ef = ElfFile::parse(file)?;
//! let mut exec = vec![0u8; usize::try_from(ef.footprint()).unwrap()];
//! let mut image = ef.load(&mut exec, 0, None)?;
//! unsafe { image.relocate(0)? };
//! # Ok(())
//! # }
//! ```
#![no_std]

mod error;
mod file;
mod image;

pub use error::LoadError;
pub use file::ElfFile;
pub use image::ElfImage;

/// Result type for loading operations.
pub type Result<T> = core::result::Result<T, LoadError>;

/// Logs an advisory diagnostic and forwards the error.
///
/// Diagnostics are informational; the returned error alone decides the
/// outcome.
pub(crate) fn reject<T>(err: LoadError) -> Result<T> {
    log::warn!("rejecting image: {err}");
    Err(err)
}
