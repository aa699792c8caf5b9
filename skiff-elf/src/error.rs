//! Error taxonomy for parsing, loading and relocating.

use thiserror::Error;

/// Everything that can go wrong between raw file bytes and a relocated
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoadError {
    // Bad input.
    #[error("file is shorter than an ELF header")]
    Truncated,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("file is not 64bit")]
    Not64Bit,
    #[error("file is not little endian")]
    NotLittleEndian,
    #[error("unsupported ELF version")]
    BadVersion,
    #[error("file does not use the System V ABI")]
    BadAbi,
    #[error("file is not a position-independent executable")]
    BadType,
    #[error("file is not compiled for x86_64")]
    BadMachine,
    #[error("unsupported processor flags")]
    BadFlags,
    #[error("header table extends past the end of the file")]
    TableOutOfBounds,
    #[error("segment data extends past the end of the file")]
    SegmentBounds,
    #[error("segments other than one R-X and one R-W are not supported")]
    SegmentMix,
    #[error("unsupported section type {0:#x}")]
    SectionType(u32),
    #[error("more than one {0} section")]
    DuplicateSection(&'static str),
    #[error("unsupported section: {0}")]
    SectionName(&'static str),
    #[error("address arithmetic overflow")]
    Overflow,

    // Unsupported features.
    #[error("missing a required loadable segment")]
    MissingSegment,
    #[error("executable stacks are not supported")]
    ExecutableStack,
    #[error("unsupported relocation type {0}")]
    RelocationType(u32),

    // Capacity.
    #[error("exec region too small: need {need:#x} bytes, got {got:#x}")]
    ExecTooSmall { need: u64, got: u64 },

    // Callback failures.
    #[error("mark-executable callback failed")]
    MarkRxFailed,

    // Descriptor misuse.
    #[error("relocations already applied")]
    AlreadyRelocated,
    #[error("relocation base does not match the base recorded at load")]
    BaseMismatch,
    #[error("descriptor blob is malformed")]
    BadDescriptor,
}
