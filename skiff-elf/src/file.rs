//! Parse-phase handle over an ELF file and the segment copy into
//! executable memory.

use crate::{ElfImage, LoadError, Result, image, reject};
use skiff_core::elf::{
    EI_ABIVERSION, EI_CLASS, EI_DATA, EI_OSABI, EI_VERSION, ELFCLASS64, ELFDATA2LSB, ELFMAG,
    ELFOSABI_SYSV, EM_X86_64, ET_DYN, EV_CURRENT, Ehdr64, PF_RW, PF_RX, PF_X, PT_GNU_STACK,
    PT_LOAD, Phdr64, SHT_DYNAMIC, SHT_DYNSYM, SHT_FINI_ARRAY, SHT_HASH, SHT_INIT_ARRAY, SHT_NOBITS,
    SHT_NOTE, SHT_NULL, SHT_PROGBITS, SHT_RELA, SHT_STRTAB, SHT_SYMTAB, SHT_X86_64_UNWIND, Shdr64,
};
use skiff_core::mem::align_up;
use skiff_core::start::{MarkRxFn, Region};

/// The section holding the unwind descriptors, located by name.
const EH_FRAME_SECTION: &[u8] = b".eh_frame";

/// Section names the loader refuses to carry: legacy constructor and
/// destructor machinery that the guest CRT does not run.
const REJECTED_SECTIONS: [(&[u8], &str); 4] = [
    (b".init", "init"),
    (b".fini", "fini"),
    (b".ctors", "ctors"),
    (b".dtors", "dtors"),
];

/// A validated view over the raw bytes of an ELF file.
///
/// The handle borrows the file for the duration of the parse/load phase;
/// the [`ElfImage`] produced by [`load`](Self::load) carries no such
/// borrow and is the only thing the runtime phase gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfFile<'a> {
    bytes: &'a [u8],
    ehdr: Ehdr64,
    /// The single read-execute loadable segment.
    rx: Phdr64,
    /// The single read-write loadable segment.
    rw: Phdr64,
    rela: Option<Shdr64>,
    init_array: Option<Shdr64>,
    fini_array: Option<Shdr64>,
    eh_frame: Option<Shdr64>,
    footprint: u64,
}

impl<'a> ElfFile<'a> {
    /// Validates `bytes` as a loadable static PIE and computes its
    /// memory footprint.
    ///
    /// # Errors
    ///
    /// Returns the first [`LoadError`] the validation rules hit, in rule
    /// order: header identification, object/machine type, header-table
    /// bounds, segment permissions, section allowlist, section names.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let Some(ehdr) = Ehdr64::read_from(bytes, 0) else {
            return reject(LoadError::Truncated);
        };

        if ehdr.e_ident[..4] != ELFMAG {
            return reject(LoadError::BadMagic);
        }
        if ehdr.e_ident[EI_CLASS] != ELFCLASS64 {
            return reject(LoadError::Not64Bit);
        }
        if ehdr.e_ident[EI_DATA] != ELFDATA2LSB {
            return reject(LoadError::NotLittleEndian);
        }
        if ehdr.e_ident[EI_VERSION] != EV_CURRENT {
            return reject(LoadError::BadVersion);
        }
        if ehdr.e_ident[EI_OSABI] != ELFOSABI_SYSV {
            return reject(LoadError::BadAbi);
        }
        if ehdr.e_ident[EI_ABIVERSION] != 0 {
            return reject(LoadError::BadAbi);
        }
        if ehdr.e_type != ET_DYN {
            return reject(LoadError::BadType);
        }
        if ehdr.e_machine != EM_X86_64 {
            return reject(LoadError::BadMachine);
        }
        if ehdr.e_version != u32::from(EV_CURRENT) {
            return reject(LoadError::BadVersion);
        }
        if ehdr.e_flags != 0 {
            return reject(LoadError::BadFlags);
        }

        let filesz = bytes.len() as u64;
        if table_end(ehdr.e_phoff, ehdr.e_phnum, size_of::<Phdr64>())? > filesz
            || table_end(ehdr.e_shoff, ehdr.e_shnum, size_of::<Shdr64>())? > filesz
        {
            return reject(LoadError::TableOutOfBounds);
        }

        let mut file = Self {
            bytes,
            ehdr,
            rx: zeroed_phdr(),
            rw: zeroed_phdr(),
            rela: None,
            init_array: None,
            fini_array: None,
            eh_frame: None,
            footprint: 0,
        };

        file.scan_segments()?;
        file.scan_sections()?;

        Ok(file)
    }

    /// The contiguous number of bytes the loaded image occupies:
    /// `max(p_paddr + p_memsz)` over the loadable segments.
    #[must_use]
    #[inline]
    pub const fn footprint(&self) -> u64 {
        self.footprint
    }

    fn scan_segments(&mut self) -> Result<()> {
        let mut rx = None;
        let mut rw = None;

        for i in 0..self.ehdr.e_phnum {
            let offset = self.ehdr.e_phoff as usize + usize::from(i) * size_of::<Phdr64>();
            // Bounds were established against the whole table above.
            let phdr = Phdr64::read_from(self.bytes, offset).ok_or(LoadError::TableOutOfBounds)?;

            if phdr.p_type == PT_GNU_STACK {
                if phdr.p_flags & PF_X != 0 {
                    return reject(LoadError::ExecutableStack);
                }
                continue;
            }
            if phdr.p_type != PT_LOAD {
                continue;
            }

            match phdr.p_flags {
                PF_RX if rx.is_none() => rx = Some(phdr),
                PF_RW if rw.is_none() => rw = Some(phdr),
                _ => return reject(LoadError::SegmentMix),
            }

            if phdr.p_filesz > phdr.p_memsz {
                return reject(LoadError::SegmentBounds);
            }
            let file_end = phdr
                .p_offset
                .checked_add(phdr.p_filesz)
                .ok_or(LoadError::Overflow)?;
            if file_end > self.bytes.len() as u64 {
                return reject(LoadError::SegmentBounds);
            }

            let mem_end = phdr
                .p_paddr
                .checked_add(phdr.p_memsz)
                .ok_or(LoadError::Overflow)?;
            if mem_end > self.footprint {
                self.footprint = mem_end;
            }
        }

        let (Some(rx), Some(rw)) = (rx, rw) else {
            return reject(LoadError::MissingSegment);
        };
        self.rx = rx;
        self.rw = rw;
        Ok(())
    }

    fn scan_sections(&mut self) -> Result<()> {
        let shstrtab = self.section_at(self.ehdr.e_shstrndx);

        for i in 0..self.ehdr.e_shnum {
            let offset = self.ehdr.e_shoff as usize + usize::from(i) * size_of::<Shdr64>();
            let shdr = Shdr64::read_from(self.bytes, offset).ok_or(LoadError::TableOutOfBounds)?;

            match shdr.sh_type {
                SHT_RELA => record_unique(&mut self.rela, shdr, "relocation")?,
                SHT_INIT_ARRAY => record_unique(&mut self.init_array, shdr, "init-array")?,
                SHT_FINI_ARRAY => record_unique(&mut self.fini_array, shdr, "fini-array")?,
                // Symbol tables and their support sections are accepted
                // but never consulted.
                SHT_NULL | SHT_PROGBITS | SHT_SYMTAB | SHT_STRTAB | SHT_HASH | SHT_DYNAMIC
                | SHT_NOTE | SHT_NOBITS | SHT_DYNSYM | SHT_X86_64_UNWIND => {}
                other => return reject(LoadError::SectionType(other)),
            }

            let name = section_name(self.bytes, shstrtab.as_ref(), shdr.sh_name);
            if name == EH_FRAME_SECTION {
                self.eh_frame = Some(shdr);
                continue;
            }
            for (rejected, tag) in REJECTED_SECTIONS {
                if name == rejected {
                    return reject(LoadError::SectionName(tag));
                }
            }
        }

        Ok(())
    }

    fn section_at(&self, index: u16) -> Option<Shdr64> {
        if index >= self.ehdr.e_shnum {
            return None;
        }
        let offset = self.ehdr.e_shoff as usize + usize::from(index) * size_of::<Shdr64>();
        Shdr64::read_from(self.bytes, offset)
    }

    /// Copies the image's runtime bytes into `exec` and records the
    /// discovered sections, rebased to `virt`.
    ///
    /// `virt` is the base address the image will execute at; `0` means
    /// "where it was loaded", i.e. the address of `exec` itself. The
    /// optional `mark_rx` callback is handed the R-X segment so the host
    /// can drop write permission from it.
    ///
    /// The returned [`ElfImage`] is self-contained: it carries no
    /// reference to the file bytes, so it can outlive them, be persisted
    /// with [`ElfImage::to_bytes`], and be relocated in a different
    /// address space than the one that loaded it.
    ///
    /// # Errors
    ///
    /// [`LoadError::ExecTooSmall`] if `exec` is shorter than
    /// [`footprint`](Self::footprint), or [`LoadError::MarkRxFailed`] if
    /// the callback reports failure.
    pub fn load(
        &self,
        exec: &mut [u8],
        virt: u64,
        mark_rx: Option<MarkRxFn>,
    ) -> Result<ElfImage> {
        if (exec.len() as u64) < self.footprint {
            return reject(LoadError::ExecTooSmall {
                need: self.footprint,
                got: exec.len() as u64,
            });
        }

        let exec_base = exec.as_ptr() as u64;
        let virt = if virt == 0 { exec_base } else { virt };

        // Zeroing the whole region seeds the BSS, which is the tail of
        // the R-W segment where memsz > filesz.
        exec.fill(0);

        let mut segments = [Region::empty(); 2];
        for (slot, phdr) in segments.iter_mut().zip([&self.rx, &self.rw]) {
            let src = usize::try_from(phdr.p_offset).map_err(|_| LoadError::Overflow)?;
            let dst = usize::try_from(phdr.p_paddr).map_err(|_| LoadError::Overflow)?;
            let len = usize::try_from(phdr.p_filesz).map_err(|_| LoadError::Overflow)?;
            exec[dst..dst + len].copy_from_slice(&self.bytes[src..src + len]);

            *slot = Region::new(virt + phdr.p_paddr, runtime_size(phdr)?);
        }

        if let Some(mark_rx) = mark_rx {
            let addr = usize::try_from(self.rx.p_paddr).map_err(|_| LoadError::Overflow)?;
            // Safety:
            // The callback receives the R-X segment's runtime extent.
            // Its base lies inside `exec`; the aligned size may extend
            // past `footprint` into the page-granular tail the allocator
            // contract reserves.
            let status =
                unsafe { mark_rx(exec.as_mut_ptr().add(addr), segments[0].size as usize) };
            if status != 0 {
                return reject(LoadError::MarkRxFailed);
            }
        }

        Ok(image::assemble(
            self,
            virt,
            exec_base,
            segments[0],
            segments[1],
        ))
    }

    pub(crate) const fn entry(&self) -> u64 {
        self.ehdr.e_entry
    }

    pub(crate) fn rela(&self) -> Option<&Shdr64> {
        self.rela.as_ref()
    }

    pub(crate) fn init_array(&self) -> Option<&Shdr64> {
        self.init_array.as_ref()
    }

    pub(crate) fn fini_array(&self) -> Option<&Shdr64> {
        self.fini_array.as_ref()
    }

    pub(crate) fn eh_frame(&self) -> Option<&Shdr64> {
        self.eh_frame.as_ref()
    }
}

/// Exclusive end of a header table, or `Overflow` if the arithmetic
/// wraps.
fn table_end(offset: u64, count: u16, entry_size: usize) -> Result<u64> {
    offset
        .checked_add(u64::from(count) * entry_size as u64)
        .ok_or(LoadError::Overflow)
}

/// A segment's in-memory size, rounded up to its alignment.
fn runtime_size(phdr: &Phdr64) -> Result<u64> {
    if phdr.p_align > 1 && phdr.p_align.is_power_of_two() {
        align_up(phdr.p_memsz, phdr.p_align).ok_or(LoadError::Overflow)
    } else {
        Ok(phdr.p_memsz)
    }
}

fn record_unique(slot: &mut Option<Shdr64>, shdr: Shdr64, what: &'static str) -> Result<()> {
    if slot.is_some() {
        return reject(LoadError::DuplicateSection(what));
    }
    *slot = Some(shdr);
    Ok(())
}

/// The NUL-terminated name of a section, bounded by the string table's
/// extent. Unreadable names resolve to the empty string, which matches
/// nothing.
fn section_name<'b>(bytes: &'b [u8], shstrtab: Option<&Shdr64>, name: u32) -> &'b [u8] {
    let Some(strtab) = shstrtab else {
        return b"";
    };
    let Some(start) = strtab.sh_offset.checked_add(u64::from(name)) else {
        return b"";
    };
    let Some(end) = strtab.sh_offset.checked_add(strtab.sh_size) else {
        return b"";
    };
    let (Ok(start), Ok(end)) = (usize::try_from(start), usize::try_from(end)) else {
        return b"";
    };
    if start >= end || end > bytes.len() {
        return b"";
    }
    let tail = &bytes[start..end];
    let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    &tail[..len]
}

const fn zeroed_phdr() -> Phdr64 {
    Phdr64 {
        p_type: 0,
        p_flags: 0,
        p_offset: 0,
        p_vaddr: 0,
        p_paddr: 0,
        p_filesz: 0,
        p_memsz: 0,
        p_align: 0,
    }
}
