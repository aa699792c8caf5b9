//! The `_start` trampoline and the C-runtime entry glue.
//!
//! Control arrives from the host driver as a plain function call:
//! `_start(sp, args)`. The trampoline saves the host stack pointer into
//! the thread-context header (which `sp` points at), pivots onto the
//! guest stack, and hands the start-args to [`start_c`]. When the CRT
//! returns, the trampoline restores the host stack and returns the
//! status like any other function. The host never knows the stack
//! changed under the call.

use crate::context;
use skiff_core::start::{Region, Request, StartArgs};
use skiff_core::{STATUS_SUCCESS, Status};

type MainFn = extern "C" fn(argc: i32, argv: *const *const u8) -> i32;
type ServiceFn = extern "C" fn(request: u64, arg1: u64, arg2: u64) -> Status;

/// Runs one guest session according to the request discriminator.
///
/// A full run seeds the process-wide context, walks the init-array,
/// dispatches to `main`, and walks the fini-array. The `Init` and
/// `Fini` requests perform just their half of that and report success;
/// any other request value goes to the service entry verbatim.
pub(crate) fn dispatch(args: &StartArgs, main: MainFn, service: ServiceFn) -> Status {
    let run = args.request == u64::from(Request::Run);
    let init = args.request == u64::from(Request::Init);
    let fini = args.request == u64::from(Request::Fini);

    if run || init {
        context::init(args);
        run_array(args.init_array);
        if init {
            return STATUS_SUCCESS;
        }
    }

    let status = if run {
        Status::from(main(args.argc, args.argv))
    } else {
        service(args.request, args.arg1, args.arg2)
    };

    if run || fini {
        run_array(args.fini_array);
        if fini {
            return STATUS_SUCCESS;
        }
    }

    status
}

/// Walks a dense array of function pointers in index order, skipping
/// null slots.
fn run_array(array: Region) {
    if !array.is_set() {
        return;
    }

    let count = array.size / size_of::<usize>() as u64;
    for i in 0..count {
        let slot = (array.addr + i * size_of::<usize>() as u64) as *const usize;
        // Safety:
        // The region was located inside the loaded image by the loader;
        // init/fini arrays are arrays of function pointers by format.
        let addr = unsafe { slot.read_unaligned() };
        if addr == 0 {
            continue;
        }
        // Safety: non-null entry of an init/fini array.
        let func = unsafe { core::mem::transmute::<usize, extern "C" fn()>(addr) };
        func();
    }
}

#[cfg(not(test))]
mod boot {
    use super::{StartArgs, Status, dispatch};

    unsafe extern "C" {
        fn __skiff_main(argc: i32, argv: *const *const u8) -> i32;
        fn __skiff_service(request: u64, arg1: u64, arg2: u64) -> Status;
    }

    extern "C" fn main_hook(argc: i32, argv: *const *const u8) -> i32 {
        // Safety: bound by the `entry_point!` macro in the guest binary.
        unsafe { __skiff_main(argc, argv) }
    }

    extern "C" fn service_hook(request: u64, arg1: u64, arg2: u64) -> Status {
        // Safety: bound by the `entry_point!` macro in the guest binary.
        unsafe { __skiff_service(request, arg1, arg2) }
    }

    /// C-runtime entry, reached from the trampoline on the guest stack.
    #[unsafe(export_name = "_start_c")]
    extern "C" fn start_c(args: *const StartArgs) -> Status {
        // Safety:
        // The driver passes a record that outlives this invocation.
        let args = unsafe { &*args };
        dispatch(args, main_hook, service_hook)
    }

    /// Offset of `ThreadContext::saved_sp`, kept in sync by the layout
    /// assertion in `skiff_core::thread`.
    const SAVED_SP: u64 = 24;

    #[cfg(target_arch = "x86_64")]
    #[unsafe(naked)]
    #[unsafe(export_name = "_start")]
    unsafe extern "C" fn start(_sp: u64, _args: *const StartArgs) -> Status {
        // rdi holds the guest stack pointer (the address of the
        // thread-context header), rsi the start-args. The header is
        // 16-byte aligned, so the ABI's call alignment holds after the
        // pivot.
        core::arch::naked_asm!(
            "mov [rdi + {saved_sp}], rsp",
            "mov rsp, rdi",
            "mov rdi, rsi",
            "call {start_c}",
            "mov rsp, [rsp + {saved_sp}]",
            "ret",
            saved_sp = const SAVED_SP,
            start_c = sym start_c,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ffi::c_void;
    use skiff_core::syscall::{Syscall, WriteArgs};
    use std::sync::Mutex;
    use std::vec::Vec;

    static OUTPUT: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    unsafe extern "C" fn recording_syscall(id: u64, args: *mut c_void) {
        if matches!(Syscall::try_from(id), Ok(Syscall::Write)) {
            let write = unsafe { &mut *args.cast::<WriteArgs>() };
            let bytes = unsafe { std::slice::from_raw_parts(write.buf, write.nbyte) };
            OUTPUT.lock().unwrap().extend_from_slice(bytes);
            write.error = 0;
            write.ret = write.nbyte as i64;
        }
    }

    /// Start-args wired to the recording callback. Every test uses the
    /// same callback because the context is seeded once per process.
    fn test_args() -> StartArgs {
        StartArgs {
            syscall: Some(recording_syscall),
            ..StartArgs::empty()
        }
    }

    extern "C" fn ctor_writes_a() {
        crate::syscalls::sc_write(1, b"A".as_ptr(), 1);
    }

    extern "C" fn main_writes_b(_argc: i32, _argv: *const *const u8) -> i32 {
        crate::syscalls::sc_write(1, b"B".as_ptr(), 1);
        0
    }

    extern "C" fn main_unreachable(_argc: i32, _argv: *const *const u8) -> i32 {
        panic!("main must not run for this request");
    }

    static SERVICE_CALLS: Mutex<Vec<(u64, u64, u64)>> = Mutex::new(Vec::new());

    extern "C" fn recording_service(request: u64, arg1: u64, arg2: u64) -> Status {
        SERVICE_CALLS.lock().unwrap().push((request, arg1, arg2));
        7
    }

    extern "C" fn service_unreachable(_request: u64, _arg1: u64, _arg2: u64) -> Status {
        panic!("service must not run for a full run");
    }

    #[test]
    fn init_array_runs_before_main() {
        let ctors: [usize; 1] = [ctor_writes_a as usize];
        let mut args = test_args();
        args.init_array = Region::new(ctors.as_ptr() as u64, 8);

        OUTPUT.lock().unwrap().clear();
        let status = dispatch(&args, main_writes_b, service_unreachable);

        assert_eq!(status, 0);
        assert_eq!(OUTPUT.lock().unwrap().as_slice(), b"AB");
    }

    static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    extern "C" fn mark_one() {
        ORDER.lock().unwrap().push("one");
    }

    extern "C" fn mark_two() {
        ORDER.lock().unwrap().push("two");
    }

    #[test]
    fn arrays_skip_null_slots_in_index_order() {
        let funcs: [usize; 4] = [mark_one as usize, 0, mark_two as usize, mark_one as usize];

        run_array(Region::new(funcs.as_ptr() as u64, 32));

        assert_eq!(ORDER.lock().unwrap().as_slice(), ["one", "two", "one"]);
    }

    #[test]
    fn empty_array_is_a_no_op() {
        run_array(Region::empty());
    }

    #[test]
    fn foreign_request_goes_to_the_service_entry() {
        let mut args = test_args();
        args.request = 0xBEEF;
        args.arg1 = 11;
        args.arg2 = 22;

        let status = dispatch(&args, main_unreachable, recording_service);

        assert_eq!(status, 7);
        assert!(
            SERVICE_CALLS
                .lock()
                .unwrap()
                .contains(&(0xBEEF, 11, 22))
        );
    }

    static INIT_CTOR_RUNS: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

    extern "C" fn counting_ctor() {
        INIT_CTOR_RUNS.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
    }

    #[test]
    fn init_request_runs_constructors_only() {
        let ctors: [usize; 2] = [counting_ctor as usize, counting_ctor as usize];
        let mut args = test_args();
        args.request = u64::from(Request::Init);
        args.init_array = Region::new(ctors.as_ptr() as u64, 16);

        let status = dispatch(&args, main_unreachable, service_unreachable);

        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(
            INIT_CTOR_RUNS.load(core::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    static FINI_DTOR_RUNS: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

    extern "C" fn counting_dtor() {
        FINI_DTOR_RUNS.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
    }

    #[test]
    fn fini_request_reports_success_after_destructors() {
        let dtors: [usize; 1] = [counting_dtor as usize];
        let mut args = test_args();
        args.request = u64::from(Request::Fini);
        args.fini_array = Region::new(dtors.as_ptr() as u64, 8);

        let status = dispatch(&args, main_unreachable, recording_service);

        // The service entry sees the request first; the fini-array runs
        // after it, and the phase itself reports success.
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(FINI_DTOR_RUNS.load(core::sync::atomic::Ordering::SeqCst), 1);
        assert!(
            SERVICE_CALLS
                .lock()
                .unwrap()
                .iter()
                .any(|call| call.0 == u64::from(Request::Fini))
        );
    }
}
