//! Process-wide guest state, initialized exactly once per session.
//!
//! The CRT entry seeds this before any user code runs; afterwards it is
//! effectively read-only (the heap cursor is the one moving part, and it
//! is atomic). The exception-frame record, the syscall callback and
//! the heap would otherwise be three loose globals; a start-once cell
//! keeps their mutation window to a single, well-defined point.

use crate::heap::BumpHeap;
use skiff_core::start::{Region, StartArgs, SyscallFn};
use spin::Once;

pub(crate) struct RtContext {
    /// Exception-frame table of the loaded image, for the unwinder's
    /// registration hook.
    pub eh_frame: Region,
    /// Host syscall callback, if the host configured one.
    pub syscall: Option<SyscallFn>,
    /// The guest heap, consumed by `sbrk` and the global allocator.
    pub heap: BumpHeap,
}

static CONTEXT: Once<RtContext> = Once::new();

/// Seeds the runtime context from the start-args record. Later calls in
/// the same session are no-ops, matching the init/run/fini split where
/// only the first phase registers global resources.
pub(crate) fn init(args: &StartArgs) {
    CONTEXT.call_once(|| RtContext {
        eh_frame: args.eh_frame,
        syscall: args.syscall,
        heap: BumpHeap::new(args.heap.addr, args.heap.size),
    });
}

/// The runtime context, or `None` before the CRT entry has run.
pub(crate) fn get() -> Option<&'static RtContext> {
    CONTEXT.get()
}

/// The registered exception-frame table.
///
/// Exposed for the unwinder's frame-registration hook; the runtime only
/// records it, never interprets it.
#[must_use]
pub fn eh_frame() -> Region {
    get().map_or_else(Region::empty, |ctx| ctx.eh_frame)
}
