//! The start-argument record handed to a guest's entry point, and the
//! host callback seam.
//!
//! One `StartArgs` exists per invocation. The execution driver fills it
//! in, the guest `_start` trampoline receives a pointer to it, and the
//! guest CRT copies what it needs into its own process-wide state before
//! `main` runs. Addresses travel as plain `u64` so the record means the
//! same thing on both sides of a host/guest address-space split.

use core::ffi::c_void;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A contiguous memory region by address and size. `addr == 0` means
/// "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Region {
    pub addr: u64,
    pub size: u64,
}

impl Region {
    #[must_use]
    #[inline]
    pub const fn new(addr: u64, size: u64) -> Self {
        Self { addr, size }
    }

    #[must_use]
    #[inline]
    pub const fn empty() -> Self {
        Self { addr: 0, size: 0 }
    }

    /// Whether the region is present.
    #[must_use]
    #[inline]
    pub const fn is_set(&self) -> bool {
        self.addr != 0
    }
}

/// Allocation callback: returns a writable region of at least the given
/// size, aligned to page granularity, or null on failure.
pub type AllocFn = unsafe extern "C" fn(size: usize) -> *mut u8;

/// Release callback for regions previously returned by [`AllocFn`].
pub type ReleaseFn = unsafe extern "C" fn(ptr: *mut u8, size: usize);

/// Protection callback: adjusts a region to read+execute. Returns 0 on
/// success, non-zero on failure.
pub type MarkRxFn = unsafe extern "C" fn(ptr: *mut u8, size: usize) -> i64;

/// Syscall callback: dispatches on the identifier and reads/writes the
/// fields of the argument record behind the pointer.
pub type SyscallFn = unsafe extern "C" fn(id: u64, args: *mut c_void);

/// What the host is asking the guest CRT to do for this invocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum Request {
    /// Run init-array, `main`, fini-array: a whole session in one call.
    Run = 0,
    /// Run the init-array and register global resources, then return.
    Init = 1,
    /// Run the fini-array, then return.
    Fini = 2,
}

/// Everything a guest needs to run, gathered by the execution driver.
///
/// The section locators are copied out of the loaded image descriptor.
/// The four regions are owned by the caller (or allocated through
/// `alloc` and released through `release` by the driver). The record is
/// ephemeral: it only has to outlive the single entry-point call it is
/// built for.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct StartArgs {
    /// Exception-frame table, registered by the guest CRT for the
    /// unwinder. Not interpreted by the loader.
    pub eh_frame: Region,
    /// Dense array of constructor function pointers.
    pub init_array: Region,
    /// Dense array of destructor function pointers.
    pub fini_array: Region,

    /// Request discriminator, one of [`Request`] as `u64`.
    pub request: u64,
    /// First request payload word (service dispatch only).
    pub arg1: u64,
    /// Second request payload word (service dispatch only).
    pub arg2: u64,

    /// Number of program arguments.
    pub argc: i32,
    /// Program argument vector (C strings); may be null when `argc == 0`.
    pub argv: *const *const u8,

    /// The loaded executable image.
    pub exec: Region,
    /// The guest stack buffer (twice the logical stack size).
    pub stack: Region,
    /// The guest thread-local block.
    pub tls: Region,
    /// The guest heap, consumed linearly by the CRT bump allocator.
    pub heap: Region,

    /// Thread identity, 0 unless the host runs several guests.
    pub thread_id: u64,

    pub alloc: Option<AllocFn>,
    pub release: Option<ReleaseFn>,
    pub syscall: Option<SyscallFn>,
}

impl StartArgs {
    /// An empty record: no sections, no regions, no callbacks.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            eh_frame: Region::empty(),
            init_array: Region::empty(),
            fini_array: Region::empty(),
            request: 0,
            arg1: 0,
            arg2: 0,
            argc: 0,
            argv: core::ptr::null(),
            exec: Region::empty(),
            stack: Region::empty(),
            tls: Region::empty(),
            heap: Region::empty(),
            thread_id: 0,
            alloc: None,
            release: None,
            syscall: None,
        }
    }
}

impl Default for StartArgs {
    fn default() -> Self {
        Self::empty()
    }
}

/// Signature of the guest image's entry point.
///
/// The first argument is the starting stack pointer (the address of the
/// thread-context header), the second points at the start-args record.
pub type EntryFn = unsafe extern "C" fn(sp: u64, args: *const StartArgs) -> crate::Status;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        assert_eq!(Request::try_from(0u64).unwrap(), Request::Run);
        assert_eq!(Request::try_from(2u64).unwrap(), Request::Fini);
        assert!(Request::try_from(3u64).is_err());
        assert_eq!(u64::from(Request::Init), 1);
    }

    #[test]
    fn empty_args_have_no_callbacks() {
        let args = StartArgs::empty();
        assert!(args.alloc.is_none());
        assert!(args.syscall.is_none());
        assert!(!args.heap.is_set());
        assert_eq!(args.argc, 0);
    }

    #[test]
    fn nullable_callbacks_stay_ffi_sized() {
        // Option<fn> must niche-optimize to a plain nullable pointer for
        // the record to cross the C ABI.
        assert_eq!(size_of::<Option<AllocFn>>(), size_of::<usize>());
        assert_eq!(size_of::<Option<SyscallFn>>(), size_of::<usize>());
    }
}
