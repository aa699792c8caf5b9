//! POSIX-shaped shims forwarding to the host syscall callback.
//!
//! Each shim packs its inputs into the matching record from
//! `skiff_core::syscall`, presets the error field to "not implemented",
//! and hands the record to the host. If no callback is installed the
//! defaults propagate: everything fails with `ENOSYS`. A non-zero error
//! on return lands in the guest-local [`errno`] cell.

use crate::context;
use core::ffi::c_void;
use core::sync::atomic::{AtomicI32, Ordering};
use skiff_core::syscall::{
    CloseArgs, ENOSYS, ExitArgs, FstatArgs, IsattyArgs, LseekArgs, OpenArgs, ReadArgs, Syscall,
    WriteArgs,
};

// The guest runs a single thread, so one cell is enough.
static ERRNO: AtomicI32 = AtomicI32::new(0);

/// The last error reported by a shim, 0 if none.
#[must_use]
#[inline]
pub fn errno() -> i32 {
    ERRNO.load(Ordering::Relaxed)
}

#[inline]
pub(crate) fn set_errno(value: i32) {
    ERRNO.store(value, Ordering::Relaxed);
}

/// Invokes the host callback, if one is installed.
fn dispatch(id: Syscall, args: *mut c_void) {
    if let Some(syscall) = context::get().and_then(|ctx| ctx.syscall) {
        // Safety:
        // The callback came through the start-args record; honoring the
        // (id, record) contract is the host's side of the bargain.
        unsafe { syscall(id.into(), args) };
    }
}

fn transcribe(error: i32) {
    if error != 0 {
        set_errno(error);
    }
}

#[inline]
pub fn sc_open(path: *const u8, oflag: i32) -> i64 {
    let mut args = OpenArgs {
        path,
        oflag,
        error: ENOSYS,
        ret: -1,
    };
    dispatch(Syscall::Open, (&raw mut args).cast());
    transcribe(args.error);
    args.ret
}

#[inline]
pub fn sc_close(fd: i32) -> i64 {
    let mut args = CloseArgs {
        fd,
        error: ENOSYS,
        ret: -1,
    };
    dispatch(Syscall::Close, (&raw mut args).cast());
    transcribe(args.error);
    args.ret
}

#[inline]
pub fn sc_write(fd: i32, buf: *const u8, nbyte: usize) -> i64 {
    let mut args = WriteArgs {
        fd,
        buf,
        nbyte,
        error: ENOSYS,
        ret: 0,
    };
    dispatch(Syscall::Write, (&raw mut args).cast());
    transcribe(args.error);
    args.ret
}

#[inline]
pub fn sc_read(fd: i32, buf: *mut u8, nbyte: usize) -> i64 {
    let mut args = ReadArgs {
        fd,
        buf,
        nbyte,
        error: ENOSYS,
        ret: 0,
    };
    dispatch(Syscall::Read, (&raw mut args).cast());
    transcribe(args.error);
    args.ret
}

#[inline]
pub fn sc_fstat(fd: i32, stat_buf: *mut u8) -> i64 {
    let mut args = FstatArgs {
        fd,
        stat_buf,
        error: ENOSYS,
        ret: -1,
    };
    dispatch(Syscall::Fstat, (&raw mut args).cast());
    transcribe(args.error);
    args.ret
}

#[inline]
pub fn sc_lseek(fd: i32, offset: i64, whence: i32) -> i64 {
    let mut args = LseekArgs {
        fd,
        offset,
        whence,
        error: ENOSYS,
        ret: -1,
    };
    dispatch(Syscall::Lseek, (&raw mut args).cast());
    transcribe(args.error);
    args.ret
}

#[inline]
pub fn sc_isatty(fd: i32) -> i64 {
    let mut args = IsattyArgs {
        fd,
        error: ENOSYS,
        ret: 0,
    };
    dispatch(Syscall::Isatty, (&raw mut args).cast());
    transcribe(args.error);
    args.ret
}

/// Asks the host to terminate the guest. If the host declines (or no
/// callback is installed) the guest parks itself instead of returning
/// into code that assumed it was done.
pub fn sc_exit(status: i32) -> ! {
    let mut args = ExitArgs { status };
    dispatch(Syscall::Exit, (&raw mut args).cast());
    loop {
        core::hint::spin_loop();
    }
}
