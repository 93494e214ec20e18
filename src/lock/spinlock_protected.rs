//! A lock that protects data belonging to a *different* struct than the
//! lock itself sits in — used for `Proc::parent`, which is guarded by the
//! process table's single global `wait_lock` rather than by a per-process
//! lock (so that reparenting and `wait()`'s parent/child scan can't race).

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ptr;

use super::{RawLock, RawSpinlock, Waitable};

pub struct SpinlockProtected<T> {
    lock: &'static RawSpinlock,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinlockProtected<T> {}

pub struct SpinlockProtectedGuard<'s> {
    lock: &'s RawSpinlock,
    _marker: PhantomData<*const ()>,
}

unsafe impl Sync for SpinlockProtectedGuard<'_> {}

impl<T> SpinlockProtected<T> {
    pub const fn new(raw_lock: &'static RawSpinlock, data: T) -> Self {
        Self {
            lock: raw_lock,
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockProtectedGuard<'_> {
        self.lock.acquire();
        SpinlockProtectedGuard {
            lock: self.lock,
            _marker: PhantomData,
        }
    }

    pub fn holding(&self) -> bool {
        self.lock.holding()
    }

    /// Returns a mutable reference to the inner data, given proof (a guard
    /// obtained from the very `RawSpinlock` this instance refers to) that
    /// the caller holds the lock.
    pub fn get_mut<'a: 'b, 'b>(&'a self, guard: &'b mut SpinlockProtectedGuard<'_>) -> &'b mut T {
        assert!(ptr::eq(self.lock, guard.lock));
        unsafe { &mut *self.data.get() }
    }
}

impl Waitable for SpinlockProtectedGuard<'_> {
    unsafe fn raw_release(&mut self) {
        self.lock.release();
    }

    unsafe fn raw_acquire(&mut self) {
        self.lock.acquire();
    }
}

impl Drop for SpinlockProtectedGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
