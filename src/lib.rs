#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Fail-fast check for caller-enforced preconditions of the hardware layer.
/// Compiled out of release builds.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        debug_assert!($cond, "invariant violated: {}", format_args!($($arg)+))
    };
}

#[macro_use]
pub mod logging;

pub mod arch;
pub mod config;
pub mod locks;
pub mod mem;

#[cfg(target_arch = "x86")]
pub use arch::x86::gdt::initialize_protection_domain;
pub use arch::x86::gdt::{initialize_protection_domain_with, set_kernel_stack};
pub use logging::init as init_logging;

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    kprintln!("{}", info);
    loop {
        arch::x86::interrupts::halt();
    }
}
