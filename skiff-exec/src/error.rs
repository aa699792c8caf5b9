//! Error taxonomy for the execution driver.

use skiff_elf::LoadError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
    /// Parsing, loading or relocating the image failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A required region is absent and no allocator is configured.
    #[error("the {0} region is absent and no allocator is configured")]
    MissingAllocator(&'static str),

    /// The allocator returned null.
    #[error("allocator failed to provide the {0} region")]
    AllocFailed(&'static str),

    /// A pre-provided stack buffer has an unusable size.
    #[error("stack region size must be twice a power-of-two logical size")]
    BadStackSize,

    /// A canary was overwritten while the guest ran.
    #[error("stack corruption detected after guest return")]
    StackCorruption,
}
