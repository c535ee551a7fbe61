use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86::interrupts::{disable_interrupts, enable_interrupts, is_int_enabled};

// Interrupt-safe spin lock guarding the descriptor tables and the process table.
// Locking disables interrupts, which are restored once the guard goes out of scope,
// so a timer interrupt never observes a half-updated structure.
#[derive(Debug)]
pub struct SpinLockIrq<T> {
    locked: AtomicBool,
    // whether interrupts were enabled at the moment the lock was taken
    interrupts: AtomicBool,
    value: UnsafeCell<T>,
}

impl<T> SpinLockIrq<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            interrupts: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> GuardIrq<T> {
        // Disabling interrupts before spinning is fine: if the lock is held, the holder
        // already disabled them and `interrupts_enabled` comes out `false`.
        let interrupts_enabled = is_int_enabled();
        if interrupts_enabled {
            disable_interrupts();
        }

        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        self.interrupts.store(interrupts_enabled, Ordering::Relaxed);
        GuardIrq { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Exclusive access without locking; the borrow checker already rules out sharing.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

unsafe impl<T> Sync for SpinLockIrq<T> where T: Send {}
unsafe impl<T> Send for SpinLockIrq<T> where T: Send {}

pub struct GuardIrq<'a, T> {
    lock: &'a SpinLockIrq<T>,
}

impl<T> Deref for GuardIrq<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for GuardIrq<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for GuardIrq<'_, T> {
    fn drop(&mut self) {
        let restore = self.lock.interrupts.load(Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
        if restore {
            enable_interrupts();
        }
    }
}

#[cfg(test)]
mod test {
    use super::SpinLockIrq;

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLockIrq::new(7u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn get_mut_bypasses_the_lock() {
        let mut lock = SpinLockIrq::new([0u8; 4]);
        lock.get_mut()[2] = 9;
        assert_eq!(lock.lock()[2], 9);
        assert!(!lock.is_locked());
    }
}
