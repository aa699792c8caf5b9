//! Runs a loaded image inside a synthetic execution environment.
//!
//! The driver owns no platform functionality itself: memory comes from a
//! caller-supplied allocator, executable permissions from a
//! mark-executable callback, and all guest I/O goes back out through a
//! syscall callback. That keeps it usable from a UEFI module, a kernel
//! driver, a hypervisor or a plain process alike.
//!
//! Three entry points, layered on one another:
//!
//! - [`run`] is the primitive form: a loaded, relocated [`ElfImage`] plus
//!   a partially filled [`StartArgs`].
//! - [`execv`] takes raw image bytes, program arguments and a [`HostFns`]
//!   table; parses, loads, relocates, runs, releases.
//! - [`exec`] is [`execv`] with no program arguments.
#![no_std]

mod driver;
mod error;

pub use driver::{HostFns, exec, execv, run};
pub use error::ExecError;

/// Result type for driver operations.
pub type Result<T> = core::result::Result<T, ExecError>;
