//! Component E: process lifecycle. Grounded on `proc.c`'s `allocproc`/
//! `freeproc`/`fork`/`exit`/`wait`/`kill`/`reparent`, adapted from the
//! teacher's trapframe/pagetable machinery (full VM + file system) to this
//! crate's `vm`/`page` stand-ins — spec.md scopes those subsystems as
//! external collaborators; this module only moves their opaque handles
//! around, never interprets them.
//!
//! Every operation here is split the way `proc::scheduler`/`proc::sleep`
//! already are: a total, unit-testable state-transition half, plus (for
//! `exit`) a final `sched()` call that this crate's test harness never
//! reaches (see SPEC_FULL.md's "Test tooling").

use crate::lock::SpinlockGuard;
use crate::page;
use crate::param::NOFILE;
use crate::proc::balance::least_loaded_cpu;
use crate::proc::scheduler::sched;
use crate::proc::sleep::{sleep, wakeup, WaitChannel};
use crate::proc::table::{FileHandle, ProcInner, Procstate, ProcTable};
use crate::vm;

/// Chooses the CPU a newly-placed process should run on. In `balanced`
/// mode (default), the least-loaded queue; otherwise the CPU's existing
/// affiliation (for `fork`, the parent's).
fn placement_cpu(table: &ProcTable, prior: usize) -> usize {
    cfg_if::cfg_if! {
        if #[cfg(feature = "balanced")] {
            least_loaded_cpu(table)
        } else {
            let _ = table;
            prior
        }
    }
}

/// Pops a slot off `unused`, assigns it a fresh pid, and wires up its
/// trapframe/pagetable. Returns the slot index together with its still-
/// held `lock` (mirroring `allocproc`'s contract of handing the caller a
/// locked `Proc`), or `None` if the table or backing pages are exhausted.
/// Grounded on `proc.c`'s `allocproc`.
pub fn alloc_proc(
    table: &'static ProcTable,
) -> Option<(usize, SpinlockGuard<'static, ProcInner>)> {
    let index = table.unused.pop_front(table)?;
    let p = table.get(index);

    let pid = table.pids.alloc();
    p.pid.store(pid, core::sync::atomic::Ordering::Relaxed);

    let mut guard = p.lock.lock();
    guard.state = Procstate::Used;
    guard.chan = 0;
    guard.killed = false;
    guard.xstate = 0;

    let trapframe = match page::page_alloc() {
        Some(pg) => pg,
        None => {
            drop(guard);
            push_to_unused(table, index);
            return None;
        }
    };

    let pagetable = match vm::pt_create() {
        Some(pt) => pt,
        None => {
            page::refcount_dec(trapframe);
            drop(guard);
            push_to_unused(table, index);
            return None;
        }
    };

    // SAFETY: `index` was just popped off `unused` by this thread alone
    // and has not yet been linked onto any other list, so no concurrent
    // walker can be looking at its `data`.
    let data = unsafe { &mut *p.data.get() };
    data.address_space.trapframe = trapframe;
    data.address_space.pagetable = pagetable;
    data.address_space.sz = 0;
    data.open_files = [None; NOFILE];
    data.cwd = None;
    data.context = crate::arch::Context::zeroed();
    data.context.ra = crate::proc::scheduler::forkret_trampoline as usize;
    data.context.sp = data.kstack + crate::page::PGSIZE;

    Some((index, guard))
}

/// Re-links a slot straight back onto `unused` without touching its
/// resources. Used only by `alloc_proc`'s own failure paths, where the
/// slot was popped but never finished constructing (no trapframe/pagetable
/// was actually attached yet).
fn push_to_unused(table: &'static ProcTable, index: usize) {
    table.unused.push(table, index);
}

/// Frees everything `alloc_proc` attached — trapframe page, pagetable (and
/// the user pages it owns) — and returns the slot to `unused`. The caller
/// must hold `guard`, the slot's own `lock`; this function both is, and
/// consumes, that guard, since the slot is `Unused` by the time it
/// returns and no longer has a coherent `ProcInner` to guard.
///
/// Grounded on `proc.c`'s `freeproc`.
///
/// # Panics
/// If `state == Unused` already (double-free of the same slot).
pub fn free_proc(table: &'static ProcTable, index: usize, mut guard: SpinlockGuard<'static, ProcInner>) {
    assert_ne!(guard.state, Procstate::Unused, "free_proc: double free of slot {index}");
    let p = table.get(index);

    // SAFETY: the slot is being torn down; by now it is reachable from at
    // most the `zombie` list (removed below) and this thread's `guard`,
    // never from a `ready`/`sleeping` list, so nothing else can be
    // concurrently walking it.
    let data = unsafe { &mut *p.data.get() };
    // Every caller of `free_proc` reached it via a fully-constructed slot
    // (`alloc_proc` succeeded); a slot that failed mid-construction is
    // unwound directly by `alloc_proc` itself and never reaches here.
    page::refcount_dec(data.address_space.trapframe);
    vm::pt_free(data.address_space.pagetable, data.address_space.sz);
    data.address_space.trapframe = 0;
    data.address_space.pagetable = 0;
    data.address_space.sz = 0;
    data.open_files = [None; NOFILE];
    data.cwd = None;
    p.set_name(&[]);

    guard.chan = 0;
    guard.killed = false;
    guard.xstate = 0;
    guard.state = Procstate::Unused;
    drop(guard);

    // The slot was `Zombie` (reached via `wait`) or under construction
    // (reached via `alloc_proc`'s own failure path, already off every
    // list). Only `wait` can have linked a zombie slot, and `wait` holds
    // `wait_lock` for its whole scan, serializing against any other
    // thread that might try to touch this same index's `walk_lock` via
    // `zombie`.
    let _ = table.zombie.remove(table, index);
    table.unused.push(table, index);
}

/// Creates a child process that is a copy of the caller, placed on a
/// ready queue. Returns the child's pid, or `-1` if the table/pages are
/// exhausted or the address-space copy fails (in which case the
/// half-built child is torn down before returning). Grounded on
/// `proc.c`'s `fork`.
pub fn fork(table: &'static ProcTable, parent: usize) -> i32 {
    let (child, mut guard) = match alloc_proc(table) {
        Some(pair) => pair,
        None => return -1,
    };

    let parent_sz = {
        // SAFETY: `parent` is the calling process; only it touches its own
        // `data` outside of a lock.
        let parent_data = unsafe { &*table.get(parent).data.get() };
        parent_data.address_space.sz
    };

    let copy_failed = {
        // SAFETY: see `alloc_proc`: `child` is not yet linked onto any
        // list another thread could be walking.
        let parent_data = unsafe { &*table.get(parent).data.get() };
        let child_data = unsafe { &mut *table.get(child).data.get() };

        if vm::pt_copy_user(
            parent_data.address_space.pagetable,
            child_data.address_space.pagetable,
            parent_sz,
        )
        .is_err()
        {
            true
        } else {
            child_data.address_space.sz = parent_sz;
            child_data.open_files = parent_data.open_files;
            child_data.cwd = parent_data.cwd;
            false
        }
    };
    if copy_failed {
        free_proc(table, child, guard);
        return -1;
    }
    table.get(child).set_name(&table.get(parent).name());

    let child_pid = table.get(child).pid();

    drop(guard);

    // Reparenting is guarded by `wait_lock`, never by `Proc::lock` — see
    // `table::Proc::parent`'s doc comment.
    {
        let mut parent_field = table.get(child).parent().lock();
        *table.get(child).parent().get_mut(&mut parent_field) = parent as i32;
    }

    guard = table.get(child).lock.lock();
    guard.state = Procstate::Runnable;
    drop(guard);

    let cpu = placement_cpu(table, table.get(parent).affiliated_cpu());
    table.get(child).set_affiliated_cpu(cpu);
    table.ready[cpu].push(table, child);

    child_pid
}

/// Moves every child of `parent` (by table scan) onto `init`, waking
/// `init` once per reassignment so a concurrent `wait()` there notices.
/// Caller must hold `table.wait_lock`. Grounded on `proc.c`'s `reparent`.
pub fn reparent(table: &'static ProcTable, parent: usize) {
    let init = table.initial_proc();
    for i in 0..table.process_pool.len() {
        if i == parent {
            continue;
        }
        let child = table.get(i);
        let mut parent_field = child.parent().lock();
        let cur = *child.parent().get_mut(&mut parent_field);
        if cur == parent as i32 {
            *child.parent().get_mut(&mut parent_field) = init as i32;
            drop(parent_field);
            wakeup(table, init as WaitChannel);
        }
    }
}

/// Terminates the calling process: reparents its children to `init`,
/// wakes its own parent (who may be blocked in `wait`), and becomes a
/// zombie holding `status` until reaped. Never returns. Grounded on
/// `proc.c`'s `exit`.
///
/// # Panics
/// If `index` is the table's `initial_proc` — `init` exiting is fatal,
/// per spec.md section 4.E step 1.
pub fn exit(table: &'static ProcTable, index: usize, status: i32) -> ! {
    assert_ne!(
        index,
        table.initial_proc(),
        "exit: init process exiting"
    );

    // SAFETY: only the exiting process itself touches its own `data`
    // outside of a lock, and it is about to stop running.
    let data = unsafe { &mut *table.get(index).data.get() };
    data.open_files = [None; NOFILE];
    data.cwd = None;

    table.wait_lock.acquire();
    reparent(table, index);

    let parent = {
        let mut parent_field = table.get(index).parent().lock();
        *table.get(index).parent().get_mut(&mut parent_field)
    };
    if parent >= 0 {
        wakeup(table, parent as WaitChannel);
    }

    let mut guard = table.get(index).lock.lock();
    guard.xstate = status;
    guard.state = Procstate::Zombie;
    // The exiting process is `Running`, hence on no list yet; linking it
    // onto `zombie` here, still holding its own `lock`, cannot race a
    // concurrent traversal of `zombie` for the same reason `proc_yield`'s
    // push onto `ready` cannot (see `proc::scheduler::proc_yield`'s doc).
    table.zombie.push(table, index);

    table.wait_lock.release();

    // SAFETY: `guard` is the only lock held, it was just set away from
    // `Running`, and interrupts are disabled (held spinlock).
    unsafe { sched(table, index, &mut guard) };
    unreachable!("exit: process resumed after becoming a zombie");
}

/// Blocks until some child of `index` becomes a zombie, reaps it, and
/// returns its pid; copies its exit status to `out_status` if given, via
/// `vm::either_copyout` so the destination may be a real user pointer or a
/// plain kernel location. The copy happens *before* `free_proc`, and a
/// failed copy returns `-1` without reaping the child — it stays a zombie,
/// reapable by a later `wait`, the same recoverable failure `proc.c`'s
/// `wait` preserves by aborting ahead of `freeproc`.
/// Returns `-1` if `index` has no children at all, or if `index` itself
/// has been killed while waiting. Grounded on `proc.c`'s `wait`.
pub fn wait(
    table: &'static ProcTable,
    index: usize,
    out_status: Option<vm::AddrKind>,
) -> i32 {
    table.wait_lock.acquire();
    loop {
        let mut have_kids = false;
        for i in 0..table.process_pool.len() {
            if i == index {
                continue;
            }
            let child = table.get(i);
            let is_child = {
                let mut parent_field = child.parent().lock();
                *child.parent().get_mut(&mut parent_field) == index as i32
            };
            if !is_child {
                continue;
            }
            have_kids = true;

            let guard = child.lock.lock();
            if guard.state == Procstate::Zombie {
                let pid = child.pid();
                let xstate = guard.xstate;
                drop(guard);
                if let Some(dst) = out_status {
                    if vm::either_copyout(dst, &xstate.to_ne_bytes()).is_err() {
                        table.wait_lock.release();
                        return -1;
                    }
                }
                let guard = child.lock.lock();
                free_proc(table, i, guard);
                table.wait_lock.release();
                return pid;
            }
        }

        let killed = table.get(index).lock.lock().killed;
        if !have_kids || killed {
            table.wait_lock.release();
            return -1;
        }

        // Sleep on our own index as the wait channel, woken by a child's
        // `exit` (which wakes its parent) — same rendezvous `proc.c` uses.
        sleep(table, index, index as WaitChannel, &mut WaitLockToken(table));
    }
}

/// A `Waitable` adapter so `sleep` can release/reacquire `table.wait_lock`
/// (a bare `RawSpinlock`, not a `Spinlock<T>`) across the scheduler
/// handoff, the same way it does for an ordinary lock guard.
struct WaitLockToken(&'static ProcTable);

impl crate::lock::Waitable for WaitLockToken {
    unsafe fn raw_release(&mut self) {
        unsafe { self.0.wait_lock.release() };
    }

    unsafe fn raw_acquire(&mut self) {
        unsafe { self.0.wait_lock.acquire() };
    }
}

/// Marks the process with `pid` killed, and if it is currently sleeping,
/// forces it back to `Runnable` immediately rather than waiting for it to
/// notice `killed` on its own. Returns whether a matching process was
/// found. Grounded on `proc.c`'s `kill`; resolves spec.md's noted Open
/// Question (the teacher's `kill` always returns an error code even on a
/// match) in favor of the documented contract: found ⇒ success.
pub fn kill(table: &'static ProcTable, pid: i32) -> bool {
    for i in 0..table.process_pool.len() {
        let p = table.get(i);
        let mut guard = p.lock.lock();
        if p.pid() == pid && guard.state != Procstate::Unused {
            guard.killed = true;
            if guard.state == Procstate::Sleeping {
                guard.state = Procstate::Runnable;
                guard.chan = 0;
                drop(guard);
                let cpu = placement_cpu(table, p.affiliated_cpu());
                p.set_affiliated_cpu(cpu);
                let _ = table.sleeping.remove(table, i);
                table.ready[cpu].push(table, i);
            }
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::table::ProcTable;

    fn boot_table() -> &'static ProcTable {
        let table: &'static ProcTable = Box::leak(Box::new(ProcTable::new()));
        table.init();
        crate::page::init();
        table.set_initial_proc(usize::MAX); // no real init for these unit tests
        table
    }

    #[test]
    fn alloc_then_free_recycles_the_slot() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        assert_eq!(guard.state, Procstate::Used);
        drop(guard);
        let guard = table.get(idx).lock.lock();
        free_proc(table, idx, guard);
        assert_eq!(table.unused.len(), crate::param::NPROC as i32);
    }

    #[test]
    fn fork_child_inherits_parents_size_and_name() {
        let table = boot_table();
        let (parent, guard) = alloc_proc(table).unwrap();
        drop(guard);
        table.get(parent).set_name(b"parent");
        {
            let data = unsafe { &mut *table.get(parent).data.get() };
            data.address_space.sz = 0;
        }

        let child_pid = fork(table, parent);
        assert!(child_pid > 0);
        assert_ne!(child_pid, table.get(parent).pid());
    }

    #[test]
    fn fork_returns_minus_one_when_table_is_full() {
        let table = boot_table();
        let mut guards = Vec::new();
        while let Some((_idx, guard)) = alloc_proc(table) {
            guards.push(guard);
        }
        // table is now completely full of `Used` processes; fork from any
        // of them must fail since `alloc_proc` cannot find a free slot.
        let parent = table.process_pool.iter().position(|_| true).unwrap();
        assert_eq!(fork(table, parent), -1);
    }

    #[test]
    fn kill_returns_false_for_unknown_pid() {
        let table = boot_table();
        assert!(!kill(table, 999_999));
    }

    #[test]
    fn kill_wakes_a_sleeping_process_and_marks_it_killed() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        drop(guard);
        let pid = table.get(idx).pid();
        {
            let mut g = table.get(idx).lock.lock();
            g.state = Procstate::Sleeping;
            g.chan = 0xabc;
        }
        table.sleeping.push(table, idx);

        assert!(kill(table, pid));
        let g = table.get(idx).lock.lock();
        assert!(g.killed);
        assert_eq!(g.state, Procstate::Runnable);
    }

    #[test]
    fn reparent_moves_children_to_init_and_wakes_it() {
        let table = boot_table();
        let (init, guard) = alloc_proc(table).unwrap();
        drop(guard);
        table.set_initial_proc(init);

        let (parent, guard) = alloc_proc(table).unwrap();
        drop(guard);
        let (child, guard) = alloc_proc(table).unwrap();
        drop(guard);
        {
            let mut pf = table.get(child).parent().lock();
            *table.get(child).parent().get_mut(&mut pf) = parent as i32;
        }

        table.wait_lock.acquire();
        reparent(table, parent);
        table.wait_lock.release();

        let mut pf = table.get(child).parent().lock();
        assert_eq!(*table.get(child).parent().get_mut(&mut pf), init as i32);
    }

    #[test]
    fn wait_copies_status_before_freeing_the_zombie() {
        let table = boot_table();
        let (parent, guard) = alloc_proc(table).unwrap();
        drop(guard);
        let (child, guard) = alloc_proc(table).unwrap();
        drop(guard);
        {
            let mut pf = table.get(child).parent().lock();
            *table.get(child).parent().get_mut(&mut pf) = parent as i32;
        }
        let child_pid = table.get(child).pid();
        {
            let mut g = table.get(child).lock.lock();
            g.state = Procstate::Zombie;
            g.xstate = 42;
        }
        table.zombie.push(table, child);

        let mut status = 0i32;
        let dst = vm::AddrKind::Kernel {
            addr: &mut status as *mut i32 as *mut u8,
        };
        let reaped = wait(table, parent, Some(dst));

        assert_eq!(reaped, child_pid);
        assert_eq!(status, 42);
        // the slot was actually recycled, not merely reported as reaped
        let g = table.get(child).lock.lock();
        assert_eq!(g.state, Procstate::Unused);
    }
}
