//! A guest driven in phases: the host sends `Init` once, any number of
//! service requests, then `Fini`. `main` still works for hosts that
//! prefer a single full run.
#![no_std]
#![no_main]

use skiff_rt::{STATUS_FAILURE, STATUS_SUCCESS, Status};

skiff_rt::entry_point!(main, service = service);

fn main(_argc: i32, _argv: *const *const u8) -> i32 {
    skiff_rt::println!("service guest: full run");
    0
}

fn service(request: u64, arg1: u64, arg2: u64) -> Status {
    match request {
        // Echo: hand both payload words back through descriptor 1.
        0x100 => {
            skiff_rt::println!("echo {arg1:#x} {arg2:#x}");
            STATUS_SUCCESS
        }
        // Teardown state lives in the runtime; nothing extra to do.
        r if r == u64::from(skiff_rt::Request::Fini) => STATUS_SUCCESS,
        _ => STATUS_FAILURE,
    }
}
