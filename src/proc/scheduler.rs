//! Component G: the per-CPU scheduler loop and the two context-switch
//! leaves (`sched`, entered by a process giving up the CPU; `scheduler`,
//! each hart's outermost loop) that bracket every `switch()`. Grounded on
//! `proc.c`'s `scheduler()`/`sched()`/`forkret()`, generalized from one
//! global run-queue scan to a per-CPU `ready` list with work-stealing
//! (spec.md component G; the teacher has no equivalent of stealing, since
//! it never had more than one run queue to steal from).

use crate::arch::{self, intr_get, intr_on, switch, Context};
use crate::cpu::CPUS;
use crate::lock::SpinlockGuard;
use crate::param::NCPU;
use crate::proc::table::{ProcInner, Procstate, ProcTable};

/// Gives up the CPU. Splits, per this crate's test-tooling convention,
/// into a testable state-transition half (none here — callers are
/// responsible for setting `state` before calling this) and the
/// untestable half that actually calls `switch()`.
///
/// # Safety
/// Caller must hold `table.get(index).lock` (as `guard`), that lock must
/// be the only one held by this cpu (`noff() == 1`), `guard.state` must
/// not be `Running`, and interrupts must be disabled. All four match
/// `proc.c`'s `sched()` assertions; violating any of them is this crate's
/// definition of a fatal scheduling bug, so they are asserted rather than
/// propagated as an error.
pub unsafe fn sched(table: &ProcTable, index: usize, guard: &mut SpinlockGuard<'_, ProcInner>) {
    assert!(
        table.get(index).lock.holding(),
        "sched: {index} lock not held"
    );
    assert_eq!(CPUS.current().noff(), 1, "sched: holding multiple locks");
    assert_ne!(guard.state, Procstate::Running, "sched: process still running");
    assert!(!intr_get(), "sched: interruptible");

    // SAFETY: `guard` proves exclusive access to this process's scheduling
    // state, which is what serializes access to its saved `Context` too
    // (see `table::ProcData`'s doc comment).
    let proc_ctx = unsafe { &mut (*table.get(index).data.get()).context as *mut Context };
    unsafe { switch(proc_ctx, CPUS.current().context_ptr()) };
}

/// Voluntarily gives up the CPU, staying `Runnable` and returning to the
/// back of this cpu's own ready queue. A running process is never a
/// member of any list (only `Unused`/`Sleeping`/`Zombie`/`Runnable`
/// processes are), so pushing `index` onto `ready[cpu]` while still
/// holding `index`'s `lock` cannot race a concurrent traversal that is
/// also trying to acquire `index`'s `walk_lock` first — nobody can be
/// partway through visiting `index` on any list, because it isn't linked
/// into one yet. See `list`'s module doc and `proc::sleep::sleep`'s
/// identical argument.
///
/// Unlike `wakeup`'s re-placement, plain `yield` never recomputes
/// `affiliated_cpu`: spec.md's `balanced` feature only governs fork's
/// initial placement and wakeup's re-placement, not voluntary yielding.
pub fn proc_yield(table: &'static ProcTable, index: usize) {
    let p = table.get(index);
    let mut guard = p.lock.lock();
    guard.state = Procstate::Runnable;
    table.ready[crate::cpu::cpuid()].push(table, index);
    // SAFETY: see the function doc: `noff() == 1` (only `guard` is held),
    // interrupts are off (a just-acquired spinlock disables them), and
    // `state` was just set away from `Running` above.
    unsafe { sched(table, index, &mut guard) };
    drop(guard);
}

/// Entered, conceptually, as the first instruction a brand-new process
/// runs: the scheduler switched into it while still holding its lock on
/// its behalf (see `scheduler`, below), so the first thing any process
/// must do is release that lock before returning to its caller. Grounded
/// on `forkret()`.
pub fn forkret(table: &'static ProcTable, index: usize) {
    // SAFETY: `scheduler` acquired this lock and then `mem::forget`-ed the
    // guard across the `switch()` into this process; this is the other
    // half of that handoff.
    unsafe { table.get(index).lock.unlock() };
}

/// The real entry point stashed in a fresh process's `context.ra` by
/// `proc::lifecycle::alloc_proc`: this is what `switch()` actually jumps
/// to the very first time `scheduler()` runs a never-before-run slot.
/// Never called directly by this crate's own Rust code — only reached via
/// the raw context switch — so it is `extern "C"` and reads its identity
/// out of `CPUS.current()` rather than taking parameters, exactly as
/// `proc.c`'s `forkret()` does.
///
/// # Safety
/// Must only ever be reached by `switch()` landing in a context built by
/// `alloc_proc`.
pub extern "C" fn forkret_trampoline() -> ! {
    // SAFETY: this function only runs as a process's very first
    // instruction, immediately after `scheduler` set `CPUS.current().proc`
    // and switched in.
    let index = unsafe { CPUS.current().proc().expect("forkret_trampoline: no current proc") };
    forkret(&crate::kernel::PROCS, index);

    // A real build returns to user space here (`usertrapret`). This crate
    // treats that as an external collaborator (spec.md's trap subsystem);
    // there is nothing further for a process with no real user image to
    // do, so it idles by yielding forever.
    loop {
        proc_yield(&crate::kernel::PROCS, index);
    }
}

/// Tries to steal a `Runnable` process from some other cpu's ready queue,
/// in ascending cpu order starting just after `cpu`. Updates the stolen
/// process's `affiliated_cpu` to `cpu`. Pure list manipulation — no
/// `switch()` involved — so unlike `scheduler` this is exercised directly
/// by unit tests.
pub fn steal_proc(table: &'static ProcTable, cpu: usize) -> Option<usize> {
    for offset in 1..NCPU {
        let victim = (cpu + offset) % NCPU;
        if let Some(index) = table.ready[victim].pop_front(table) {
            table.get(index).set_affiliated_cpu(cpu);
            return Some(index);
        }
    }
    None
}

/// Each hart's outermost loop: never returns. Picks a `Runnable` process
/// off this cpu's own ready queue (falling back to stealing one), marks
/// it `Running`, and switches into it; control returns here only once
/// that process calls `sched()` again. Grounded on `scheduler()`.
pub fn scheduler(table: &'static ProcTable) -> ! {
    let cpu = crate::cpu::cpuid();
    loop {
        // Enable interrupts so a process parked waiting for one (e.g. a
        // disk completion) is not starved if every cpu is otherwise idle.
        intr_on();

        let index = table.ready[cpu]
            .pop_front(table)
            .or_else(|| steal_proc(table, cpu));

        let Some(index) = index else { continue };
        let p = table.get(index);
        let mut guard = p.lock.lock();
        if guard.state != Procstate::Runnable {
            // Raced with something that moved it again (e.g. a concurrent
            // kill); put it back if it's still runnable-looking, otherwise
            // just drop it and look for other work.
            drop(guard);
            continue;
        }
        guard.state = Procstate::Running;
        CPUS.current().set_proc(Some(index));

        // SAFETY: `guard` is held and is the only lock this cpu holds;
        // `switch` itself has no locking precondition of its own, only
        // `sched()` (called from the process's own stack once it's been
        // switched into) does.
        let proc_ctx = unsafe { &mut (*p.data.get()).context as *mut Context };
        unsafe { arch::switch(CPUS.current().context_ptr(), proc_ctx) };

        CPUS.current().set_proc(None);
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::table::ProcTable;

    fn boot_table() -> &'static ProcTable {
        let table: &'static ProcTable = Box::leak(Box::new(ProcTable::new()));
        table.init();
        table
    }

    #[test]
    fn steal_proc_finds_work_on_another_cpu() {
        let table = boot_table();
        let idx = table.unused.pop_front(table).unwrap();
        table.get(idx).set_affiliated_cpu(3);
        table.ready[3].push(table, idx);

        let stolen = steal_proc(table, 0);
        assert_eq!(stolen, Some(idx));
        assert_eq!(table.get(idx).affiliated_cpu(), 0);
        assert_eq!(table.ready[3].len(), 0);
    }

    #[test]
    fn steal_proc_returns_none_when_every_queue_is_empty() {
        let table = boot_table();
        assert_eq!(steal_proc(table, 0), None);
    }

    #[test]
    fn steal_proc_prefers_the_first_nonempty_queue_after_self() {
        let table = boot_table();
        let a = table.unused.pop_front(table).unwrap();
        let b = table.unused.pop_front(table).unwrap();
        table.ready[2].push(table, a);
        table.ready[5].push(table, b);

        // Starting from cpu 1, cpu 2's queue should be found before cpu 5's.
        assert_eq!(steal_proc(table, 1), Some(a));
    }
}
