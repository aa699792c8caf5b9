//! Bit-exact ELF64 type bindings and constants.
//!
//! Only the subset of the SysV ELF-64 format that the loader accepts is
//! bound here. The structures mirror the on-disk layout exactly (verified
//! by the size assertions at the bottom), and every multi-byte field is
//! little-endian, which is the only data encoding the loader supports.

/// Number of identification bytes at the start of an ELF file.
pub const EI_NIDENT: usize = 16;

// e_ident indexes.
pub const EI_MAG0: usize = 0;
pub const EI_MAG1: usize = 1;
pub const EI_MAG2: usize = 2;
pub const EI_MAG3: usize = 3;
pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const EI_VERSION: usize = 6;
pub const EI_OSABI: usize = 7;
pub const EI_ABIVERSION: usize = 8;

// e_ident values.
pub const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u8 = 1;
pub const ELFOSABI_SYSV: u8 = 0;

// Object file types.
pub const ET_EXEC: u16 = 2;
/// Shared object / position-independent executable.
pub const ET_DYN: u16 = 3;

// Machine types.
pub const EM_X86_64: u16 = 62;

// Program header types.
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_GNU_STACK: u32 = 0x6474_E551;

// Program header flags.
pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;
pub const PF_RX: u32 = PF_R | PF_X;
pub const PF_RW: u32 = PF_R | PF_W;

// Section header types. These form the acceptance allowlist: a section of
// any other type makes the whole image invalid.
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_HASH: u32 = 5;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_NOTE: u32 = 7;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;
pub const SHT_INIT_ARRAY: u32 = 14;
pub const SHT_FINI_ARRAY: u32 = 15;
pub const SHT_X86_64_UNWIND: u32 = 0x7000_0001;

// Relocation types.
/// The only relocation the loader applies: `*target += base`.
pub const R_X86_64_RELATIVE: u32 = 8;

/// ELF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Ehdr64 {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF program header (segment descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Phdr64 {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// ELF section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Shdr64 {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// ELF relocation entry with addend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Rela64 {
    pub r_offset: u64,
    pub r_info: u64,
    pub r_addend: i64,
}

impl Rela64 {
    /// Relocation type, from the low 32 bits of `r_info`.
    #[must_use]
    #[inline]
    pub const fn r_type(&self) -> u32 {
        (self.r_info & 0xFFFF_FFFF) as u32
    }

    /// Symbol table index, from the high 32 bits of `r_info`.
    #[must_use]
    #[inline]
    pub const fn r_sym(&self) -> u32 {
        (self.r_info >> 32) as u32
    }
}

macro_rules! impl_read_from {
    ($($t:ty),+) => {$(
        impl $t {
            /// Copies one record out of `bytes` at `offset`.
            ///
            /// Returns `None` if the slice is too short. The copy goes
            /// through an unaligned read, so `bytes` needs no particular
            /// alignment.
            #[must_use]
            pub fn read_from(bytes: &[u8], offset: usize) -> Option<Self> {
                let end = offset.checked_add(size_of::<Self>())?;
                if end > bytes.len() {
                    return None;
                }
                // Safety:
                // The range check above guarantees `size_of::<Self>()`
                // readable bytes at `offset`, and the type is plain data
                // with no invalid bit patterns.
                Some(unsafe {
                    bytes
                        .as_ptr()
                        .add(offset)
                        .cast::<Self>()
                        .read_unaligned()
                })
            }
        }
    )+};
}

impl_read_from!(Ehdr64, Phdr64, Shdr64, Rela64);

// The on-disk record sizes the format prescribes. Anything else means the
// bindings above have drifted.
const _: () = assert!(size_of::<Ehdr64>() == 64);
const _: () = assert!(size_of::<Phdr64>() == 56);
const _: () = assert!(size_of::<Shdr64>() == 64);
const _: () = assert!(size_of::<Rela64>() == 24);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_ehdr_from_bytes() {
        let mut bytes = [0u8; 64];
        bytes[..4].copy_from_slice(&ELFMAG);
        bytes[EI_CLASS] = ELFCLASS64;
        bytes[16..18].copy_from_slice(&ET_DYN.to_le_bytes());
        bytes[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        bytes[24..32].copy_from_slice(&0x1234u64.to_le_bytes());

        let ehdr = Ehdr64::read_from(&bytes, 0).unwrap();
        assert_eq!(ehdr.e_ident[..4], ELFMAG);
        assert_eq!(ehdr.e_type, ET_DYN);
        assert_eq!(ehdr.e_machine, EM_X86_64);
        assert_eq!(ehdr.e_entry, 0x1234);
    }

    #[test]
    fn read_from_rejects_short_slice() {
        let bytes = [0u8; 63];
        assert!(Ehdr64::read_from(&bytes, 0).is_none());
        assert!(Ehdr64::read_from(&bytes, usize::MAX).is_none());
    }

    #[test]
    fn read_from_is_alignment_agnostic() {
        let mut bytes = [0u8; 57];
        bytes[1..5].copy_from_slice(&PT_LOAD.to_le_bytes());
        bytes[5..9].copy_from_slice(&PF_RX.to_le_bytes());

        let phdr = Phdr64::read_from(&bytes, 1).unwrap();
        assert_eq!(phdr.p_type, PT_LOAD);
        assert_eq!(phdr.p_flags, PF_RX);
    }

    #[test]
    fn rela_info_split() {
        let rela = Rela64 {
            r_offset: 0,
            r_info: (7u64 << 32) | u64::from(R_X86_64_RELATIVE),
            r_addend: -8,
        };
        assert_eq!(rela.r_type(), R_X86_64_RELATIVE);
        assert_eq!(rela.r_sym(), 7);
    }
}
