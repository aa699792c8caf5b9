//! The canonical guest: proves the whole path from host driver to
//! syscall callback and back.
#![no_std]
#![no_main]

skiff_rt::entry_point!(main);

fn main(argc: i32, _argv: *const *const u8) -> i32 {
    skiff_rt::println!("hello from the guest ({argc} args)");
    0
}
