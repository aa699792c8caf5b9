//! Thread-context header and stack layout discipline.
//!
//! Every guest stack carries a fixed 64-byte control block at its top.
//! The starting stack pointer handed to the guest is the address of that
//! block, so the guest reaches it with small negative offsets while the
//! usable stack grows downward. A canary sits at both ends of the logical
//! stack: the header canary catches underflows (it is the first thing an
//! underflow overwrites), the bottom canary catches overflows.
//!
//! Stack buffers are allocated at `2 * logical_size` so that a logical
//! stack aligned to its own size always fits, wherever the allocation
//! lands. The top of stack is found by masking, which also gives the
//! guest an alignment it can rely on for SIMD spills.
//!
//! ```text
//! ------------ base + 2 * L
//! |          |
//! |   ---    | tos            <- aligned to L
//! |   ---    | tos - 64       <- thread context (canary first)
//! |          |                   = starting stack pointer
//! |          |
//! |   ---    | bos = tos - L  <- bottom canary
//! |          |
//! ------------ base
//! ```

use crate::mem::is_aligned;

/// Sentinel written at both ends of the logical stack.
pub const CANARY: u64 = 0xBF42_BF42_BF42_BF42;

/// Fixed-layout control block at the top of every guest stack.
///
/// The canary must stay the first field: it is the first thing a stack
/// underflow overwrites. The struct must stay exactly 64 bytes so the
/// starting stack pointer keeps 64-byte alignment.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ThreadContext {
    /// Underflow canary, set to [`CANARY`] on setup.
    pub canary: u64,
    /// Address of this thread's TLS block.
    pub tls_ptr: u64,
    /// Identity of this thread (0 for single-guest runs).
    pub thread_id: u64,
    /// Host stack pointer, saved by the guest `_start` trampoline and
    /// restored when the guest returns.
    pub saved_sp: u64,
    reserved: [u64; 4],
}

const _: () = assert!(size_of::<ThreadContext>() == 64);

/// Top of the logical stack inside a `2 * logical_size` buffer at `base`.
#[must_use]
#[inline]
pub const fn top_of_stack(base: u64, logical_size: u64) -> u64 {
    debug_assert!(logical_size.is_power_of_two());
    (base + 2 * logical_size) & !(logical_size - 1)
}

/// Bottom of the logical stack inside a `2 * logical_size` buffer.
#[must_use]
#[inline]
pub const fn bottom_of_stack(base: u64, logical_size: u64) -> u64 {
    top_of_stack(base, logical_size) - logical_size
}

/// Address of the thread-context header for the stack topped at `tos`.
#[must_use]
#[inline]
pub const fn context_addr(tos: u64) -> u64 {
    tos - size_of::<ThreadContext>() as u64
}

/// Lays out the thread-context header and both canaries inside `stack`.
///
/// `stack` must point to a writable buffer of at least
/// `2 * logical_size` bytes and `logical_size` must be a power of two.
/// Returns the starting stack pointer for the guest: the address of the
/// header itself.
///
/// ## Safety
///
/// `stack` must be valid for writes over `2 * logical_size` bytes and
/// stay untouched by the host while the guest runs.
#[must_use]
pub unsafe fn setup_stack(stack: *mut u8, logical_size: u64, thread_id: u64, tls: *mut u8) -> u64 {
    let base = stack as u64;
    let tos = top_of_stack(base, logical_size);
    let bos = bottom_of_stack(base, logical_size);

    let ctx = context_addr(tos) as *mut ThreadContext;
    // Safety:
    // `ctx` and the bottom-of-stack word both lie inside the buffer: the
    // aligned logical stack [bos, tos) is contained in
    // [base, base + 2 * logical_size) by construction.
    unsafe {
        ctx.write(ThreadContext {
            canary: CANARY,
            tls_ptr: tls as u64,
            thread_id,
            saved_sp: 0,
            reserved: [0; 4],
        });
        (bos as *mut u64).write(CANARY);
    }

    debug_assert!(is_aligned(ctx as u64, 64));
    ctx as u64
}

/// Checks both canaries after a guest run.
///
/// Returns `false` if either end of the logical stack was overwritten.
///
/// ## Safety
///
/// `stack` must be the same buffer (and `logical_size` the same size)
/// previously passed to [`setup_stack`].
#[must_use]
pub unsafe fn validate_canaries(stack: *const u8, logical_size: u64) -> bool {
    let base = stack as u64;
    let tos = top_of_stack(base, logical_size);
    let bos = bottom_of_stack(base, logical_size);

    // Safety:
    // Same bounds argument as in `setup_stack`.
    unsafe {
        let ctx = &*(context_addr(tos) as *const ThreadContext);
        ctx.canary == CANARY && (bos as *const u64).read() == CANARY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const L: u64 = 0x1000;

    fn aligned_buffer() -> Vec<u64> {
        // u64 backing keeps the canary slots aligned.
        vec![0u64; (2 * L as usize) / 8]
    }

    #[test]
    fn stack_bounds_are_aligned_and_ordered() {
        let buf = aligned_buffer();
        let base = buf.as_ptr() as u64;

        let tos = top_of_stack(base, L);
        let bos = bottom_of_stack(base, L);

        assert!(is_aligned(tos, L));
        assert_eq!(tos - bos, L);
        assert!(bos >= base);
        assert!(tos <= base + 2 * L);
    }

    #[test]
    fn setup_writes_header_and_canaries() {
        let mut buf = aligned_buffer();
        let base = buf.as_mut_ptr().cast::<u8>();

        let tls = 0x7150_0000usize as *mut u8;
        let sp = unsafe { setup_stack(base, L, 7, tls) };

        let tos = top_of_stack(base as u64, L);
        assert_eq!(sp, context_addr(tos));
        assert!(is_aligned(sp, 64));

        let ctx = unsafe { &*(sp as *const ThreadContext) };
        assert_eq!(ctx.canary, CANARY);
        assert_eq!(ctx.thread_id, 7);
        assert_eq!(ctx.tls_ptr, tls as u64);
        assert_eq!(ctx.saved_sp, 0);

        assert!(unsafe { validate_canaries(base, L) });
    }

    #[test]
    fn underflow_trips_header_canary() {
        let mut buf = aligned_buffer();
        let base = buf.as_mut_ptr().cast::<u8>();

        let sp = unsafe { setup_stack(base, L, 0, core::ptr::null_mut()) };
        unsafe { (sp as *mut u64).write(CANARY + 1) };

        assert!(!unsafe { validate_canaries(base, L) });
    }

    #[test]
    fn overflow_trips_bottom_canary() {
        let mut buf = aligned_buffer();
        let base = buf.as_mut_ptr().cast::<u8>();

        let _ = unsafe { setup_stack(base, L, 0, core::ptr::null_mut()) };
        let bos = bottom_of_stack(base as u64, L);
        unsafe { (bos as *mut u64).write(0) };

        assert!(!unsafe { validate_canaries(base, L) });
    }
}
