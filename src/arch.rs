//! The sliver of RISC-V-specific machine state this crate actually touches:
//! the device-interrupt enable bit and the hart id. Page tables, traps, and
//! the rest of the CSR file belong to the VM/trap subsystems this crate
//! treats as external collaborators (see `vm`, `page`).
//!
//! Under `cfg(test)` these are replaced by host-portable stand-ins so the
//! process/scheduler logic can run under `cargo test` on the development
//! machine: a real `sstatus`/`tp` doesn't exist there, and `switch()` has no
//! assembly trampoline to jump to. Tests that need a notion of "which CPU am
//! I" call `arch::test_support::set_cpu_id` before exercising per-CPU code.

#[cfg(not(test))]
mod hw {
    const SSTATUS_SIE: u64 = 1 << 1;

    #[inline]
    unsafe fn r_sstatus() -> u64 {
        let x: u64;
        unsafe { llvm_asm!("csrr $0, sstatus" : "=r" (x) : : : "volatile") };
        x
    }

    #[inline]
    unsafe fn w_sstatus(x: u64) {
        unsafe { llvm_asm!("csrw sstatus, $0" : : "r" (x) : : "volatile") };
    }

    /// Enables device interrupts on this hart.
    pub fn intr_on() {
        unsafe { w_sstatus(r_sstatus() | SSTATUS_SIE) };
    }

    /// Disables device interrupts on this hart.
    pub fn intr_off() {
        unsafe { w_sstatus(r_sstatus() & !SSTATUS_SIE) };
    }

    /// Are device interrupts currently enabled on this hart?
    pub fn intr_get() -> bool {
        unsafe { r_sstatus() & SSTATUS_SIE != 0 }
    }

    /// Reads `tp`, which `start.rs` initializes to this hart's id.
    pub fn cpuid() -> usize {
        let x: u64;
        unsafe { llvm_asm!("mv $0, tp" : "=r" (x) : : : "volatile") };
        x as usize
    }
}

#[cfg(test)]
mod hw {
    use core::cell::Cell;

    thread_local! {
        static INTR_ENABLED: Cell<bool> = Cell::new(false);
        static CPU_ID: Cell<usize> = Cell::new(0);
    }

    pub fn intr_on() {
        INTR_ENABLED.with(|c| c.set(true));
    }

    pub fn intr_off() {
        INTR_ENABLED.with(|c| c.set(false));
    }

    pub fn intr_get() -> bool {
        INTR_ENABLED.with(|c| c.get())
    }

    pub fn cpuid() -> usize {
        CPU_ID.with(|c| c.get())
    }

    /// Test-only: binds the calling host thread to a simulated CPU id, the
    /// way `start.rs` binds a hart's `tp` register to its hartid.
    pub mod test_support {
        use super::CPU_ID;

        pub fn set_cpu_id(id: usize) {
            CPU_ID.with(|c| c.set(id));
        }
    }
}

pub use hw::{cpuid, intr_get, intr_off, intr_on};
#[cfg(test)]
pub use hw::test_support;

/// Saved registers for a kernel context switch, laid out to match
/// `swtch.S`'s store/load order.
#[derive(Copy, Clone, Default)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

#[cfg(not(test))]
extern "C" {
    /// Saves the caller's registers into `*from` and restores them from
    /// `*to`. Implemented in `swtch.S`; this is the one leaf this crate
    /// cannot give a meaningful Rust body to, since it does not return to
    /// its caller in the usual sense — it returns into whatever context
    /// `*to` describes.
    pub fn switch(from: *mut Context, to: *mut Context);
}

/// Under test, there is no real trampoline to jump to: the test-only
/// callers of `switch` (`proc::scheduler`'s outer loop) are themselves not
/// exercised under `cfg(test)` — only the state-transition halves of
/// `sched`/`sleep`/`exit` are, and those stop short of calling `switch`.
#[cfg(test)]
pub unsafe fn switch(_from: *mut Context, _to: *mut Context) {
    unreachable!("switch() is not exercised by unit tests")
}
