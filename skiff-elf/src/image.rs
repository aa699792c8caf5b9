//! The self-contained descriptor of a loaded image.

use crate::{ElfFile, LoadError, Result, reject};
use skiff_core::elf::{R_X86_64_RELATIVE, Rela64};
use skiff_core::start::Region;

/// Layout guard for persisted descriptors ("SKIFFIM1").
const DESCRIPTOR_MAGIC: u64 = 0x534B_4946_4649_4D31;

/// A loaded (and possibly relocated) image.
///
/// Unlike [`ElfFile`], this descriptor holds no reference into the
/// original file bytes: every field is a plain word. That is what lets a
/// "compile" step persist it with [`to_bytes`](Self::to_bytes), embed it
/// next to the image bytes in some other binary, and let a consumer in a
/// different address space re-attach and relocate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ElfImage {
    magic: u64,
    /// Entry point, rebased to the load-time `virt`.
    entry: u64,
    /// Contiguous footprint of the image in bytes.
    size: u64,
    /// The virtual base everything in this descriptor is rebased to.
    virt: u64,
    /// Address of the copied image bytes in the current address space.
    /// Zeroed on persist; the consumer re-points it.
    exec_base: u64,
    /// Non-zero once relocations have been applied.
    relocated: u64,
    /// Runtime extent of the R-X segment.
    rx: Region,
    /// Runtime extent of the R-W segment.
    rw: Region,
    rela: Region,
    init_array: Region,
    fini_array: Region,
    eh_frame: Region,
}

/// Size of the persisted descriptor blob.
pub const DESCRIPTOR_SIZE: usize = size_of::<ElfImage>();

// Plain u64 pairs only: the persisted blob must have no padding to be
// stable across loader and consumer builds.
const _: () = assert!(DESCRIPTOR_SIZE == 18 * 8);

pub(crate) fn assemble(
    file: &ElfFile<'_>,
    virt: u64,
    exec_base: u64,
    rx: Region,
    rw: Region,
) -> ElfImage {
    let section = |shdr: Option<&skiff_core::elf::Shdr64>| {
        shdr.map_or_else(Region::empty, |s| Region::new(virt + s.sh_addr, s.sh_size))
    };

    ElfImage {
        magic: DESCRIPTOR_MAGIC,
        entry: virt + file.entry(),
        size: file.footprint(),
        virt,
        exec_base,
        relocated: 0,
        rx,
        rw,
        rela: section(file.rela()),
        init_array: section(file.init_array()),
        fini_array: section(file.fini_array()),
        eh_frame: section(file.eh_frame()),
    }
}

impl ElfImage {
    /// Entry point of the image, rebased to the load-time base.
    #[must_use]
    #[inline]
    pub const fn entry(&self) -> u64 {
        self.entry
    }

    /// Contiguous memory footprint of the loaded image.
    #[must_use]
    #[inline]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The virtual base the image was rebased to at load time.
    #[must_use]
    #[inline]
    pub const fn virt(&self) -> u64 {
        self.virt
    }

    /// Address of the image bytes in the current address space.
    #[must_use]
    #[inline]
    pub const fn exec_base(&self) -> u64 {
        self.exec_base
    }

    /// Re-points the descriptor at a fresh copy of the image bytes.
    ///
    /// Needed after [`from_bytes`](Self::from_bytes): the address the
    /// loader saw is meaningless in the consumer's address space.
    #[inline]
    pub const fn set_exec_base(&mut self, exec_base: u64) {
        self.exec_base = exec_base;
    }

    /// Whether relocations have been applied.
    #[must_use]
    #[inline]
    pub const fn is_relocated(&self) -> bool {
        self.relocated != 0
    }

    /// Runtime extent of the read-execute segment.
    #[must_use]
    #[inline]
    pub const fn rx(&self) -> Region {
        self.rx
    }

    /// Runtime extent of the read-write segment.
    #[must_use]
    #[inline]
    pub const fn rw(&self) -> Region {
        self.rw
    }

    /// The init-array section, or an empty region if absent.
    #[must_use]
    #[inline]
    pub const fn init_array(&self) -> Region {
        self.init_array
    }

    /// The fini-array section, or an empty region if absent.
    #[must_use]
    #[inline]
    pub const fn fini_array(&self) -> Region {
        self.fini_array
    }

    /// The exception-frame section, or an empty region if absent.
    #[must_use]
    #[inline]
    pub const fn eh_frame(&self) -> Region {
        self.eh_frame
    }

    /// Applies every relative relocation so the image is correct at
    /// virtual base `virt`.
    ///
    /// `virt` must be `0` (meaning "the base recorded at load") or equal
    /// to that base: the word fixups and the section addresses recorded
    /// at load have to agree on a single base. Relocating twice would
    /// double-add the base, so a second call is an error.
    ///
    /// The `r_addend` field is deliberately ignored: in a fully linked
    /// PIE the linker has already stored the addend at the target
    /// location, and the fixup is a plain `*target += virt`.
    ///
    /// An image without a relocation table is already correct at any
    /// base: applying its zero entries is a successful no-op.
    ///
    /// # Errors
    ///
    /// [`LoadError::RelocationType`] on anything but
    /// `R_X86_64_RELATIVE`, [`LoadError::AlreadyRelocated`] or
    /// [`LoadError::BaseMismatch`] on descriptor misuse.
    ///
    /// ## Safety
    ///
    /// `exec_base` must point at a writable copy of the loaded image,
    /// valid for the whole footprint, and nothing else may alias it for
    /// the duration of the call.
    pub unsafe fn relocate(&mut self, virt: u64) -> Result<()> {
        if self.relocated != 0 {
            return reject(LoadError::AlreadyRelocated);
        }
        if virt != 0 && virt != self.virt {
            return reject(LoadError::BaseMismatch);
        }
        if self.exec_base == 0 {
            // Relocating in place at the final address: the image bytes
            // live exactly where the guest will see them.
            self.exec_base = self.virt;
        }

        if self.rela.is_set() {
            let table = self.exec_base + (self.rela.addr - self.virt);
            let count = self.rela.size / size_of::<Rela64>() as u64;

            for i in 0..count {
                let entry = table + i * size_of::<Rela64>() as u64;
                // Safety:
                // The relocation table lies inside the loaded image,
                // whose validity over the footprint is the caller's
                // contract.
                let rela = unsafe { (entry as *const Rela64).read_unaligned() };

                if rela.r_type() != R_X86_64_RELATIVE {
                    return reject(LoadError::RelocationType(rela.r_type()));
                }

                let target = (self.exec_base + rela.r_offset) as *mut u64;
                // Safety:
                // Same contract; `r_offset` is an offset into the image.
                unsafe {
                    let value = target.read_unaligned().wrapping_add(self.virt);
                    target.write_unaligned(value);
                }
            }
        }

        self.relocated = 1;
        Ok(())
    }

    /// Serializes the descriptor for the compile-step blob.
    ///
    /// The `exec_base` field is zeroed first: it is the one field that
    /// only makes sense in the loader's address space.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut copy = *self;
        copy.exec_base = 0;

        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        // Safety:
        // `ElfImage` is repr(C) with no padding (asserted above), so its
        // object representation is exactly DESCRIPTOR_SIZE initialized
        // bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(
                core::ptr::from_ref(&copy).cast::<u8>(),
                bytes.as_mut_ptr(),
                DESCRIPTOR_SIZE,
            );
        }
        bytes
    }

    /// Re-attaches a descriptor persisted by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// [`LoadError::BadDescriptor`] if the blob is short or its layout
    /// guard does not match.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DESCRIPTOR_SIZE {
            return reject(LoadError::BadDescriptor);
        }
        // Safety:
        // Any DESCRIPTOR_SIZE bytes are a valid object representation of
        // this all-integer struct; the magic check below rejects foreign
        // blobs.
        let image = unsafe { bytes.as_ptr().cast::<Self>().read_unaligned() };
        if image.magic != DESCRIPTOR_MAGIC {
            return reject(LoadError::BadDescriptor);
        }
        Ok(image)
    }
}
