//! Process control blocks and the table that owns them.
//!
//! A process is `Uninit` until its creator finishes setting it up, then moves
//! between `Runnable` and `Sleeping` until it exits and becomes a `Zombie`.
//! The zombie keeps its slot until its parent (or the reaper) reclaims it.

mod context;
mod error;
#[cfg(any(test, target_arch = "x86"))]
mod lock;
mod pid;
mod process;
mod queue;
mod table;

#[cfg(target_arch = "x86")]
pub use context::switch_context;
pub use context::{Context, SwitchFrames};
pub use error::{CreateError, ProcessError};
pub use pid::Pid;
pub use process::{KernelStack, Process, ProcessFlags, ProcessInit, ProcessName, State};
pub use queue::{QueueId, RunQueue};
pub use table::ProcessTable;

use lazy_static::lazy_static;

use crate::locks::SpinLockIrq;

lazy_static! {
    static ref PROCESS_TABLE: SpinLockIrq<ProcessTable> = SpinLockIrq::new(ProcessTable::new());
}

#[cfg(target_arch = "x86")]
static SWITCH_LOCK: lock::SwitchLock = lock::SwitchLock::new();

/// Runs `f` with the kernel's process table locked.
pub fn with_process_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    f(&mut PROCESS_TABLE.lock())
}

/// Timer-tick hook: asks the running process to yield at the next
/// scheduling point.
pub fn request_resched() -> bool {
    with_process_table(ProcessTable::request_resched_current)
}

/// Switches the CPU to `next`, pointing the TSS at its kernel stack first.
/// Returns once some other task switches back to the caller.
#[cfg(target_arch = "x86")]
pub fn switch_to(next: Pid) -> Result<(), ProcessError> {
    use crate::arch::x86::gdt::with_protection_domain;

    SWITCH_LOCK.lock();
    // both guards are gone before the stack changes under us
    let frames = with_process_table(|table| {
        with_protection_domain(|domain| table.prepare_switch(next, domain.tss_mut()))
    });

    let result = match frames {
        // SAFETY: interrupts stay off under SWITCH_LOCK and the frames point
        // into the table's heap slots, which never move
        Ok(Some(frames)) => unsafe {
            switch_context(frames);
            Ok(())
        },
        Ok(None) => Ok(()),
        Err(error) => Err(error),
    };

    // SAFETY: locked above, or by the task that switched back to us
    unsafe { SWITCH_LOCK.unlock() };
    result
}

/// First thing a freshly started task runs: the task that switched to it
/// still holds the switch lock.
///
/// # Safety
/// Only valid as the first call of a task entered through `switch_context`.
#[cfg(target_arch = "x86")]
#[no_mangle]
pub unsafe extern "C" fn ringfence_finish_switch() {
    SWITCH_LOCK.unlock();
}
