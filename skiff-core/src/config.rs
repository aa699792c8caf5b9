//! Compile-time defaults for the synthetic execution environment.
//!
//! All of these can be overridden at run time by pre-populating the
//! corresponding regions of the start-args record; the execution driver
//! only falls back to these sizes when it has to allocate a region
//! itself.

/// Logical stack size handed to a guest, in bytes. Must be a power of
/// two: the top-of-stack is found by masking with this value.
pub const STACK_SIZE: u64 = 0x8000;

/// Size of the buffer to allocate for a stack. Twice the logical size so
/// a naturally aligned logical stack always fits inside, wherever the
/// allocation lands.
pub const STACK_ALLOC_SIZE: u64 = STACK_SIZE * 2;

/// Size of the thread-local block handed to a guest.
pub const TLS_SIZE: u64 = 0x1000;

/// Default guest heap size when the caller neither provides a heap nor
/// requests a specific size.
pub const HEAP_SIZE: u64 = 0x4_0000;

/// Page granularity assumed for the mark-executable callback. Allocators
/// feeding the loader should return memory aligned to this.
pub const PAGE_SIZE: u64 = 0x1000;

const _: () = assert!(STACK_SIZE.is_power_of_two());
const _: () = assert!(TLS_SIZE.is_power_of_two());
