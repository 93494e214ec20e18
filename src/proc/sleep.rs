//! Component F: the sleep/wake rendezvous. Grounded on `proc.c`'s
//! `sleep()`/`wakeup()`, generalized from a flat table scan to a scan of
//! the `sleeping` membership list (component D) via `List::drain_matching`
//! (see `list`'s module doc for why that primitive, rather than plain
//! `remove`, is what makes `wakeup` lock-order-safe).

use crate::lock::Waitable;
use crate::proc::table::{Procstate, ProcTable};

/// An opaque rendezvous token: any stable address works. By convention,
/// callers pass the address of whatever condition `chan` is guarding (a
/// buffer, a child-exit flag) cast to a `usize`; `sleep`/`wakeup` never
/// dereference it.
pub type WaitChannel = usize;

/// Chooses the CPU a newly-RUNNABLE sleeper should land on. In `balanced`
/// mode this recomputes the least-loaded CPU (spec.md's Open Question:
/// "balanced-mode wakeup recomputes affiliated_cpu for every waker"); the
/// `static` build keeps the process's existing affiliation instead, which
/// this crate picks as its resolution of that question (see DESIGN.md) to
/// avoid oscillating a process across CPUs on every unrelated wakeup.
fn placement_cpu(table: &ProcTable, prior: usize) -> usize {
    cfg_if::cfg_if! {
        if #[cfg(feature = "balanced")] {
            crate::proc::balance::least_loaded_cpu(table)
        } else {
            let _ = table;
            prior
        }
    }
}

/// Atomically releases `lock` and blocks the calling process on `chan`
/// until a matching `wakeup(chan)`. Reacquires `lock` before returning.
///
/// # Preconditions
/// The caller must not already hold `table.get(index).lock`, and `index`
/// must be the process currently executing on this CPU (only a process
/// may put itself to sleep).
///
/// # Why this can't lose a wakeup
/// `table.get(index).lock` is acquired before `lock` is released. Any
/// `wakeup` that could possibly observe the condition this sleep is
/// waiting on must, by the caller's own contract,
/// have already acquired `lock` to change that condition and then release
/// it before calling `wakeup` — so a wakeup racing with this call either
/// runs entirely before `chan`/`SLEEPING` are installed (in which case it
/// simply doesn't find this process on `sleeping` yet, but also hasn't
/// happened while the condition was false under `lock`, so the condition
/// is still true when this process finally sleeps next) or entirely after
/// (in which case it finds this process on `sleeping` with `chan` set, and
/// moves it). There is no window where the sleeper has given up looking
/// and the waker has given up notifying.
pub fn sleep<L: Waitable>(table: &'static ProcTable, index: usize, chan: WaitChannel, lock: &mut L) {
    let p = table.get(index);
    let mut guard = p.lock.lock();
    // SAFETY: paired with `raw_acquire` below before this function returns;
    // `guard` (p.lock) is held throughout, so no wakeup can miss this
    // transition (see the doc comment above).
    unsafe { lock.raw_release() };

    guard.chan = chan;
    guard.state = Procstate::Sleeping;
    // `index` is not yet linked into `sleeping` by anyone else, so pushing
    // it while still holding `guard` (p.lock) cannot deadlock against a
    // concurrent `wakeup`/`kill` traversal: such a traversal can only hold
    // `index`'s walk_lock after finding `index` already reachable from the
    // list, which isn't true until this push completes.
    table.sleeping.push(table, index);

    // SAFETY: per `sched`'s precondition, `guard` is the currently-held
    // process lock, interrupts are disabled (acquiring a spinlock disables
    // them), and `noff == 1` because this is the first lock acquired since
    // this process started running.
    unsafe { crate::proc::scheduler::sched(table, index, &mut guard) };

    guard.chan = 0;
    drop(guard);

    // SAFETY: paired with the `raw_release` above.
    unsafe { lock.raw_acquire() };
}

/// Moves every process sleeping on `chan` to RUNNABLE and onto a ready
/// queue. Must be called without holding any process's `lock`.
pub fn wakeup(table: &'static ProcTable, chan: WaitChannel) {
    if chan == 0 {
        // 0 means "not sleeping"; waking it would match every process that
        // has merely never slept. Nothing legitimately sleeps on it.
        return;
    }
    table.sleeping.drain_matching(
        table,
        |idx| {
            let p = table.get(idx);
            let mut guard = p.lock.lock();
            if guard.chan == chan {
                guard.state = Procstate::Runnable;
                guard.chan = 0;
                // SAFETY: `drain_matching` holds `idx`'s walk_lock while
                // `visit` runs.
                let cpu = unsafe { p.affiliated_cpu_locked() };
                let cpu = placement_cpu(table, cpu);
                unsafe { p.set_affiliated_cpu_locked(cpu) };
                true
            } else {
                false
            }
        },
        |idx| {
            let p = table.get(idx);
            table.ready[p.affiliated_cpu()].push(table, idx);
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{RawLock, RawSpinlock, Spinlock};
    use crate::proc::table::ProcTable;
    use std::sync::Arc;
    use std::thread;

    fn boot_table() -> &'static ProcTable {
        // Leaked on purpose: tests need a `'static` table, same as the real
        // kernel's single boot-time instance.
        let table: &'static ProcTable = Box::leak(Box::new(ProcTable::new()));
        table.init();
        table
    }

    fn make_runnable(table: &'static ProcTable) -> usize {
        let idx = table.unused.pop_front(table).unwrap();
        {
            let mut g = table.get(idx).lock.lock();
            g.state = Procstate::Used;
        }
        idx
    }

    #[test]
    fn wakeup_with_no_sleepers_is_a_no_op() {
        let table = boot_table();
        wakeup(table, 0xdead);
    }

    #[test]
    fn sleep_then_wakeup_moves_process_to_ready() {
        let table = boot_table();
        let idx = make_runnable(table);
        let chan: WaitChannel = 0x1234;

        let cond_lock: Spinlock<bool> = Spinlock::new("cond", false);
        {
            let mut cond = cond_lock.lock();
            // Simulate: caller checks the condition, finds it false, and
            // calls sleep while still holding `cond_lock` (released inside
            // `sleep` only after `p.lock` is taken).
            assert!(!*cond);
            sleep_state_only(table, idx, chan);
            *cond = true;
        }

        // The sleeper is now parked on `sleeping`.
        assert_eq!(table.get(idx).lock.lock().state, Procstate::Sleeping);

        wakeup(table, chan);
        assert_eq!(table.get(idx).lock.lock().state, Procstate::Runnable);
        assert!(table.ready[table.get(idx).affiliated_cpu()].len() >= 1);
    }

    /// Exercises only `sleep`'s state-transition half (chan/state/push),
    /// skipping `sched()` — the real `sleep` calls into the scheduler,
    /// which this crate's tests don't boot. See SPEC_FULL.md's Test
    /// tooling section.
    fn sleep_state_only(table: &'static ProcTable, idx: usize, chan: WaitChannel) {
        let p = table.get(idx);
        let mut guard = p.lock.lock();
        guard.chan = chan;
        guard.state = Procstate::Sleeping;
        table.sleeping.push(table, idx);
    }

    #[test]
    fn wakeup_ignores_sleepers_on_a_different_channel() {
        let table = boot_table();
        let idx = make_runnable(table);
        sleep_state_only(table, idx, 111);

        wakeup(table, 222);
        assert_eq!(table.get(idx).lock.lock().state, Procstate::Sleeping);

        wakeup(table, 111);
        assert_eq!(table.get(idx).lock.lock().state, Procstate::Runnable);
    }

    #[test]
    fn no_lost_wakeup_under_concurrent_sleep_and_wake() {
        // P1: check condition (false), sleep. P2: set condition, wakeup.
        // Ordering enforced by `cond_lock`, exactly the producer/consumer
        // protocol spec.md section 8 property 5 describes.
        let table = boot_table();
        let idx = make_runnable(table);
        let chan: WaitChannel = 99;
        let cond_lock = Arc::new(RawSpinlock::new("cond"));
        let table_ref = table;

        cond_lock.acquire();
        let waker = {
            let cond_lock = Arc::clone(&cond_lock);
            thread::spawn(move || {
                crate::arch::test_support::set_cpu_id(1);
                cond_lock.acquire();
                cond_lock.release();
                wakeup(table_ref, chan);
            })
        };

        // Give the waker a moment to block on cond_lock (best-effort; the
        // protocol is correct even if it doesn't, since sleep below holds
        // p.lock before releasing cond_lock).
        thread::yield_now();

        sleep_state_only(table, idx, chan);
        cond_lock.release();
        waker.join().unwrap();

        assert_eq!(table.get(idx).lock.lock().state, Procstate::Runnable);
    }
}
