//! Per-CPU state: which process (if any) is running here, the context to
//! `switch()` into to re-enter the scheduler, and the `push_off`/`pop_off`
//! interrupt-disable nesting counter that the spinlock protocol relies on.

use core::sync::atomic::{AtomicUsize, Ordering};

use array_macro::array;

use crate::arch::{self, Context};
use crate::param::NCPU;

/// Sentinel stored in `Cpu::proc` meaning "idle, nothing running here".
pub const NO_PROC: usize = usize::MAX;

pub struct Cpu {
    /// Index into the process table of the process running here, or
    /// `NO_PROC`. Only ever written by the CPU it belongs to.
    proc: AtomicUsize,

    /// `switch()` here to enter `scheduler()`.
    context: core::cell::UnsafeCell<Context>,

    /// Depth of `push_off()` nesting.
    noff: core::cell::Cell<u32>,

    /// Were interrupts enabled before the outermost `push_off()`?
    interrupt_enabled: core::cell::Cell<bool>,
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: AtomicUsize::new(NO_PROC),
            context: core::cell::UnsafeCell::new(Context::zeroed()),
            noff: core::cell::Cell::new(0),
            interrupt_enabled: core::cell::Cell::new(false),
        }
    }

    pub fn proc(&self) -> Option<usize> {
        match self.proc.load(Ordering::Relaxed) {
            NO_PROC => None,
            i => Some(i),
        }
    }

    pub fn set_proc(&self, index: Option<usize>) {
        self.proc
            .store(index.unwrap_or(NO_PROC), Ordering::Relaxed);
    }

    pub fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    /// Depth of `push_off()` nesting on this cpu. `sched()` asserts this is
    /// exactly 1 (only the lock it is about to switch away under), the same
    /// invariant xv6's `sched()` checks against `mycpu()->noff`.
    pub fn noff(&self) -> u32 {
        self.noff.get()
    }
}

// SAFETY: each `Cpu` is only ever mutated by the hart it belongs to, under
// interrupts-disabled (enforced by `push_off`/`pop_off` bracketing every
// access through `Cpus`).
unsafe impl Sync for Cpu {}

pub struct Cpus([Cpu; NCPU]);

impl Cpus {
    pub const fn new() -> Self {
        Self(array![_ => Cpu::new(); NCPU])
    }

    pub fn get(&self, id: usize) -> &Cpu {
        &self.0[id]
    }

    pub fn current(&self) -> &Cpu {
        &self.0[cpuid()]
    }

    /// Raw pointer identity of the current CPU, used by `RawSpinlock` to
    /// record (and later check) which CPU is holding it.
    pub fn current_raw(&self) -> *mut Cpu {
        &self.0[cpuid()] as *const Cpu as *mut Cpu
    }

    pub fn push_off(&self, interrupts_were_enabled: bool) {
        let cpu = self.current();
        let noff = cpu.noff.get();
        if noff == 0 {
            cpu.interrupt_enabled.set(interrupts_were_enabled);
        }
        cpu.noff.set(noff + 1);
    }

    /// Returns whether interrupts should now be turned back on.
    pub fn pop_off(&self) -> bool {
        let cpu = self.current();
        let noff = cpu.noff.get();
        assert!(noff >= 1, "pop_off: not in a push_off section");
        cpu.noff.set(noff - 1);
        noff == 1 && cpu.interrupt_enabled.get()
    }
}

impl Default for Cpus {
    fn default() -> Self {
        Self::new()
    }
}

pub static CPUS: Cpus = Cpus::new();

/// This CPU's id. Safe to call with interrupts enabled, but the scheduler
/// may move the calling process to a different CPU on a timer interrupt, so
/// the result is a snapshot, not a durable identity.
pub fn cpuid() -> usize {
    arch::cpuid()
}

/// The process index running on this CPU, if any. Caller must hold a
/// `push_off()` (directly or via a spinlock) so the cpu identity is stable.
/// Grounded on `proc.c`'s `myproc()`.
pub fn myproc() -> Option<usize> {
    CPUS.current().proc()
}
