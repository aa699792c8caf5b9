//! The three exec forms and the buffer ownership policy.

use crate::{ExecError, Result};
use skiff_core::Status;
use skiff_core::config::{HEAP_SIZE, STACK_ALLOC_SIZE, TLS_SIZE};
use skiff_core::start::{AllocFn, EntryFn, MarkRxFn, Region, ReleaseFn, StartArgs, SyscallFn};
use skiff_core::thread::{setup_stack, validate_canaries};
use skiff_elf::{ElfFile, ElfImage};

/// The platform callbacks a host hands to [`execv`]/[`exec`].
///
/// Only `alloc` is required. Without `syscall` the guest's I/O shims all
/// fail with their defaults; without `mark_rx` the allocator must return
/// memory that is already executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFns {
    pub alloc: Option<AllocFn>,
    pub release: Option<ReleaseFn>,
    pub mark_rx: Option<MarkRxFn>,
    pub syscall: Option<SyscallFn>,
}

/// A buffer the driver allocated itself and therefore owns.
#[derive(Clone, Copy)]
struct Owned {
    ptr: *mut u8,
    size: usize,
}

/// Regions the driver may have to conjure for one invocation, in
/// allocation order: TLS, stack, heap.
struct Buffers {
    owned: [Option<Owned>; 3],
    release: Option<ReleaseFn>,
}

impl Buffers {
    const fn new(release: Option<ReleaseFn>) -> Self {
        Self {
            owned: [None; 3],
            release,
        }
    }

    /// Ensures `region` is populated, allocating `size` bytes through
    /// `alloc` when it is not. Buffers allocated here are released by
    /// [`Drop`]; pre-populated ones are left alone.
    fn ensure(
        &mut self,
        slot: usize,
        region: &mut Region,
        size: u64,
        alloc: Option<AllocFn>,
        what: &'static str,
    ) -> Result<()> {
        if region.is_set() {
            return Ok(());
        }
        let Some(alloc) = alloc else {
            return Err(ExecError::MissingAllocator(what));
        };

        let len = usize::try_from(size).map_err(|_| skiff_elf::LoadError::Overflow)?;
        // Safety:
        // The allocator contract: returns null or a writable region of
        // at least `len` bytes.
        let ptr = unsafe { alloc(len) };
        if ptr.is_null() {
            log::warn!("allocator failed to provide the {what} region");
            return Err(ExecError::AllocFailed(what));
        }

        self.owned[slot] = Some(Owned { ptr, size: len });
        *region = Region::new(ptr as u64, size);
        Ok(())
    }
}

impl Drop for Buffers {
    fn drop(&mut self) {
        let Some(release) = self.release else {
            return;
        };
        for owned in self.owned.iter().flatten() {
            // Safety:
            // Each pointer came from the paired allocator and is
            // released exactly once.
            unsafe { release(owned.ptr, owned.size) };
        }
    }
}

/// Runs a loaded image with a partially filled start-args record.
///
/// Relocates the image at its load address if the caller has not done so
/// already, fills in the section locators, allocates whatever of
/// TLS/stack/heap is missing, lays out the thread context and calls the
/// entry point. After the guest returns, both stack canaries are
/// checked; a mismatch outranks whatever status the guest reported.
///
/// Buffers the driver allocated here are released on exit (when a
/// release callback is configured); buffers that arrived pre-populated
/// in `args` are the caller's.
///
/// ## Safety
///
/// `image` must describe a correctly loaded copy of a trusted guest
/// binary: the driver transfers control to its entry point. The regions
/// in `args`, where pre-populated, must be valid for their stated sizes
/// and unused by the host until the call returns.
pub unsafe fn run(image: &mut ElfImage, args: &mut StartArgs) -> Result<Status> {
    if !image.is_relocated() {
        if image.exec_base() == 0 && args.exec.is_set() {
            image.set_exec_base(args.exec.addr);
        }
        // Safety: caller's contract on `image`.
        unsafe { image.relocate(0)? };
    }

    if !args.exec.is_set() {
        args.exec = Region::new(image.exec_base(), image.size());
    }

    args.eh_frame = image.eh_frame();
    args.init_array = image.init_array();
    args.fini_array = image.fini_array();

    let mut buffers = Buffers::new(args.release);
    buffers.ensure(0, &mut args.tls, TLS_SIZE, args.alloc, "TLS")?;
    buffers.ensure(1, &mut args.stack, STACK_ALLOC_SIZE, args.alloc, "stack")?;
    let heap_size = if args.heap.size == 0 {
        HEAP_SIZE
    } else {
        args.heap.size
    };
    buffers.ensure(2, &mut args.heap, heap_size, args.alloc, "heap")?;

    // A fresh TLS block must start zeroed.
    if let Some(tls) = buffers.owned[0] {
        // Safety: just allocated, valid for `size` writes.
        unsafe { core::ptr::write_bytes(tls.ptr, 0, tls.size) };
    }

    let logical = args.stack.size / 2;
    if logical == 0 || !logical.is_power_of_two() {
        return Err(ExecError::BadStackSize);
    }

    // Safety:
    // The stack region is valid for its stated size per the caller's (or
    // the allocator's) contract.
    let sp = unsafe {
        setup_stack(
            args.stack.addr as *mut u8,
            logical,
            args.thread_id,
            args.tls.addr as *mut u8,
        )
    };

    // Safety:
    // `entry` is the relocated entry point of the loaded image; calling
    // it is the whole point, and the caller vouched for the image.
    let status = unsafe {
        let entry_ptr = image.entry() as usize as *const ();
        let entry = core::mem::transmute::<*const (), EntryFn>(entry_ptr);
        entry(sp, args)
    };

    // Safety: same stack region as above.
    if !unsafe { validate_canaries(args.stack.addr as *const u8, logical) } {
        log::error!("stack corruption detected after guest return");
        return Err(ExecError::StackCorruption);
    }

    Ok(status)
}

/// Parses, loads, relocates and runs an image with program arguments.
///
/// Image memory is allocated through `funcs.alloc` and released through
/// `funcs.release` on the way out, success or failure.
///
/// ## Safety
///
/// As for [`run`]: `file` must be a trusted guest binary, and the
/// callbacks in `funcs` must honor their contracts.
pub unsafe fn execv(file: &[u8], argv: &[*const u8], funcs: &HostFns) -> Result<Status> {
    let Some(alloc) = funcs.alloc else {
        return Err(ExecError::MissingAllocator("image"));
    };

    let ef = ElfFile::parse(file)?;
    let size = usize::try_from(ef.footprint()).map_err(|_| skiff_elf::LoadError::Overflow)?;

    // Safety: allocator contract.
    let exec_ptr = unsafe { alloc(size) };
    if exec_ptr.is_null() {
        log::warn!("allocator failed to provide the image region");
        return Err(ExecError::AllocFailed("image"));
    }

    let status = (|| -> Result<Status> {
        // Safety:
        // The allocator returned at least `size` writable bytes.
        let exec = unsafe { core::slice::from_raw_parts_mut(exec_ptr, size) };
        let mut image = ef.load(exec, 0, funcs.mark_rx)?;
        // Safety: freshly loaded image, nothing else aliases it.
        unsafe { image.relocate(0)? };

        let mut args = StartArgs {
            argc: i32::try_from(argv.len()).expect("argc fits an i32"),
            argv: if argv.is_empty() {
                core::ptr::null()
            } else {
                argv.as_ptr()
            },
            alloc: funcs.alloc,
            release: funcs.release,
            syscall: funcs.syscall,
            ..StartArgs::empty()
        };

        // Safety: caller's contract on `file` and `funcs`.
        unsafe { run(&mut image, &mut args) }
    })();

    if let Some(release) = funcs.release {
        // Safety: `exec_ptr` came from `alloc` and is released once.
        unsafe { release(exec_ptr, size) };
    }

    status
}

/// Parses, loads, relocates and runs an image with no program arguments.
///
/// ## Safety
///
/// As for [`execv`].
pub unsafe fn exec(file: &[u8], funcs: &HostFns) -> Result<Status> {
    // Safety: forwarded contract.
    unsafe { execv(file, &[], funcs) }
}
