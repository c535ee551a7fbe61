//! Interrupt flag control. On targets other than 32-bit x86 the flag is only
//! tracked in memory so the lock discipline can still be exercised.

#[cfg(target_arch = "x86")]
mod imp {
    // IF, bit 9 of EFLAGS
    const INTERRUPT_FLAG: u32 = 1 << 9;

    pub fn disable_interrupts() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
    }

    pub fn enable_interrupts() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
    }

    pub fn is_int_enabled() -> bool {
        let eflags: u32;
        unsafe {
            core::arch::asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags));
        }
        eflags & INTERRUPT_FLAG != 0
    }

    pub fn halt() {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

#[cfg(not(target_arch = "x86"))]
mod imp {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(false);

    pub fn disable_interrupts() {
        ENABLED.store(false, Ordering::SeqCst);
    }

    pub fn enable_interrupts() {
        ENABLED.store(true, Ordering::SeqCst);
    }

    pub fn is_int_enabled() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }

    pub fn halt() {
        core::hint::spin_loop();
    }
}

pub use imp::{disable_interrupts, enable_interrupts, halt, is_int_enabled};
