//! Mutual-exclusion spin locks, implemented with a CAS loop against the
//! owning CPU's pointer rather than a bare `AtomicBool`/xchg — this is what
//! lets `holding()` tell not just "is it locked" but "is it locked by me",
//! which `RawSpinlock::acquire`'s reentrancy assert depends on.

use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use super::{Lock, RawLock};
use crate::arch::{intr_get, intr_off, intr_on};
use crate::cpu::{cpuid, Cpu, CPUS};

pub struct RawSpinlock {
    name: &'static str,
    /// Pointer to the `Cpu` holding this lock, or null if unheld.
    locked: AtomicPtr<Cpu>,
}

pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'s, T> = super::Guard<'s, RawSpinlock, T>;

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            locked: AtomicPtr::new(ptr::null_mut()),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl RawLock for RawSpinlock {
    fn acquire(&self) {
        // Disable interrupts to avoid a deadlock against an interrupt
        // handler that wants the same lock on this cpu.
        push_off();
        assert!(!self.holding(), "acquire: already held: {}", self.name);

        let me = CPUS.current_raw();
        while self
            .locked
            .compare_exchange(ptr::null_mut(), me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    fn release(&self) {
        assert!(self.holding(), "release: not held: {}", self.name);
        self.locked.store(ptr::null_mut(), Ordering::Release);
        pop_off();
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == CPUS.current_raw()
    }
}

/// `push_off`/`pop_off` are like `intr_off`/`intr_on`, except they nest: it
/// takes two `pop_off`s to undo two `push_off`s, and if interrupts were
/// already off, `push_off`+`pop_off` leaves them off.
pub fn push_off() {
    let old = intr_get();
    intr_off();
    CPUS.push_off(old);
}

/// Must be paired with a preceding `push_off()`.
pub fn pop_off() {
    assert!(!intr_get(), "pop_off: interruptible");
    if CPUS.pop_off() {
        intr_on();
    }
}

pub fn cpu_id() -> usize {
    cpuid()
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Lock::new(RawSpinlock::new(name), data)
    }
}
