//! The syscall protocol between guest shims and the host callback.
//!
//! Each POSIX-shaped guest function packs its inputs into one of the
//! records below, invokes the host syscall callback with the matching
//! identifier, and reads back the `error`/`ret` pair. The identifiers
//! are opaque 64-bit constants, stable across versions: hosts dispatch
//! on them, so they must never be renumbered.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// `errno` value reported when no host callback is installed or the host
/// does not implement a call.
pub const ENOSYS: i32 = 38;
/// `errno` value reported when the guest heap is exhausted.
pub const ENOMEM: i32 = 12;

/// Stable syscall identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum Syscall {
    /// Open a file. Arguments: [`OpenArgs`].
    Open = 0xBFCA_1100_0000_0001,
    /// Close a file descriptor. Arguments: [`CloseArgs`].
    Close = 0xBFCA_1100_0000_0002,
    /// Write to a file descriptor. Arguments: [`WriteArgs`].
    Write = 0xBFCA_1100_0000_0003,
    /// Read from a file descriptor. Arguments: [`ReadArgs`].
    Read = 0xBFCA_1100_0000_0004,
    /// Stat an open file. Arguments: [`FstatArgs`].
    Fstat = 0xBFCA_1100_0000_0005,
    /// Reposition a file offset. Arguments: [`LseekArgs`].
    Lseek = 0xBFCA_1100_0000_0006,
    /// Ask whether a descriptor is a terminal. Arguments: [`IsattyArgs`].
    Isatty = 0xBFCA_1100_0000_0007,
    /// Terminate the guest. Arguments: [`ExitArgs`]. Never returns to the
    /// shim.
    Exit = 0xBFCA_1100_0000_0008,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct OpenArgs {
    // in
    pub path: *const u8,
    pub oflag: i32,
    // out
    pub error: i32,
    pub ret: i64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CloseArgs {
    // in
    pub fd: i32,
    // out
    pub error: i32,
    pub ret: i64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct WriteArgs {
    // in
    pub fd: i32,
    pub buf: *const u8,
    pub nbyte: usize,
    // out
    pub error: i32,
    pub ret: i64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ReadArgs {
    // in
    pub fd: i32,
    pub buf: *mut u8,
    pub nbyte: usize,
    // out
    pub error: i32,
    pub ret: i64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FstatArgs {
    // in
    pub fd: i32,
    pub stat_buf: *mut u8,
    // out
    pub error: i32,
    pub ret: i64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct LseekArgs {
    // in
    pub fd: i32,
    pub offset: i64,
    pub whence: i32,
    // out
    pub error: i32,
    pub ret: i64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct IsattyArgs {
    // in
    pub fd: i32,
    // out
    pub error: i32,
    pub ret: i64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ExitArgs {
    // in
    pub status: i32,
}
