use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::arch::x86::interrupts::{disable_interrupts, enable_interrupts, is_int_enabled};

// Keeps interrupts off across a context switch. Unlike a guard, the lock is
// released by whichever task runs after the switch, so it is counted rather
// than scoped.
pub(super) struct SwitchLock {
    depth: AtomicUsize,
    // interrupt flag seen by the outermost `lock`
    restore: AtomicBool,
}

impl SwitchLock {
    pub(super) const fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            restore: AtomicBool::new(false),
        }
    }

    pub(super) fn lock(&self) {
        let enabled = is_int_enabled();
        disable_interrupts();
        if self.depth.fetch_add(1, Ordering::Relaxed) == 0 {
            self.restore.store(enabled, Ordering::Relaxed);
        }
    }

    /// # Safety
    /// Must pair with an earlier `lock`, possibly taken by another task.
    pub(super) unsafe fn unlock(&self) {
        let old = self.depth.fetch_sub(1, Ordering::Relaxed);
        crate::invariant!(old > 0, "switch lock released while not held");
        if old == 1 && self.restore.load(Ordering::Relaxed) {
            enable_interrupts();
        }
    }

    #[cfg(test)]
    pub(super) fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::SwitchLock;

    #[test]
    fn nests() {
        let lock = SwitchLock::new();
        lock.lock();
        lock.lock();
        assert_eq!(lock.depth(), 2);
        unsafe {
            lock.unlock();
            lock.unlock();
        }
        assert_eq!(lock.depth(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "invariant violated")]
    fn unbalanced_unlock() {
        let lock = SwitchLock::new();
        unsafe { lock.unlock() };
    }
}
