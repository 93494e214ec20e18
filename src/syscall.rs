//! The system-call surface this core adds on top of the standard process
//! calls, per spec.md section 6. Each function here is the kernel-side
//! body a trap handler would dispatch into after decoding arguments from
//! user registers — argument decoding itself belongs to the trap
//! subsystem this crate treats as an external collaborator, so every
//! function below already takes its arguments as plain Rust values.
//!
//! Every function takes `table: &'static ProcTable` explicitly, the same
//! convention `proc::lifecycle`/`proc::scheduler`/`proc::sleep` use, so
//! these can be unit-tested against a private table instead of the real
//! boot-time `kernel::PROCS` singleton a real trap handler would pass.
//! Each operates on "the calling process", found via `cpu::myproc()`;
//! none of these make sense to call except from a hart that is currently
//! running a process, so each `.expect()`s that precondition rather than
//! threading an `Option` through every call site (mirrors the teacher's
//! `myproc()`-derived syscalls, which assume the same thing).

use crate::cpu;
use crate::proc;
use crate::proc::table::ProcTable;
use crate::vm;

fn current() -> usize {
    cpu::myproc().expect("syscall: no current process")
}

/// Pins the caller to cpu `k` and immediately yields there. Returns `k` on
/// success, `-1` if `k` is not a valid cpu id.
pub fn set_cpu(table: &'static ProcTable, k: i32) -> i32 {
    if k < 0 || k as usize >= crate::param::NCPU {
        return -1;
    }
    let index = current();
    table.get(index).set_affiliated_cpu(k as usize);
    proc::proc_yield(table, index);
    k
}

/// Reports the caller's current affiliated cpu.
pub fn get_cpu(table: &'static ProcTable) -> i32 {
    table.get(current()).affiliated_cpu() as i32
}

/// Approximate ready-queue length of cpu `k` (component H's load signal,
/// exposed directly rather than only used internally by the balancer).
/// Returns `-1` if `k` is not a valid cpu id.
pub fn cpu_process_count(table: &'static ProcTable, k: i32) -> i32 {
    if k < 0 || k as usize >= crate::param::NCPU {
        return -1;
    }
    table.ready_len(k as usize)
}

/// Creates a child process. Returns the child's pid, or `-1`.
pub fn fork(table: &'static ProcTable) -> i32 {
    proc::fork(table, current())
}

/// Terminates the caller with `status`. Never returns.
pub fn exit(table: &'static ProcTable, status: i32) -> ! {
    proc::exit(table, current(), status)
}

/// Blocks until a child exits, writing its status to `*out_status` if
/// given (via `vm::either_copyout`, so the destination may be a real user
/// pointer or — as in tests — a plain kernel location). Returns the
/// reaped child's pid, or `-1`.
pub fn wait(table: &'static ProcTable, out_status: Option<vm::AddrKind>) -> i32 {
    let index = current();
    proc::wait(table, index, out_status)
}

/// Marks `pid` killed. Returns `0` on success, `-1` if no such process
/// exists. Resolves the same Open Question `proc::lifecycle::kill` does:
/// a match is success even though the teacher's syscall wrapper always
/// returns an error code.
pub fn kill(table: &'static ProcTable, pid: i32) -> i32 {
    if proc::kill(table, pid) {
        0
    } else {
        -1
    }
}

/// A `Waitable` that releases/reacquires nothing, for syscalls (like
/// `sleep`) that have no caller-held lock of their own to hand `sleep` —
/// unlike `wait`, which hands it `table.wait_lock`.
struct NoopLock;

impl crate::lock::Waitable for NoopLock {
    unsafe fn raw_release(&mut self) {}
    unsafe fn raw_acquire(&mut self) {}
}

/// Puts the caller to sleep until the next tick, the classic xv6
/// `sys_sleep` rendezvous. The timer subsystem that calls
/// `wakeup(&TICKS)` on every tick is an external collaborator (spec.md's
/// trap/timer scope); this crate only owns the wait-channel contract.
pub fn sleep(table: &'static ProcTable) {
    static TICKS: i32 = 0;
    let index = current();
    let chan = &TICKS as *const i32 as usize;
    proc::sleep(table, index, chan, &mut NoopLock);
}

/// The caller's pid.
pub fn getpid(table: &'static ProcTable) -> i32 {
    table.get(current()).pid()
}

/// Grows (`n > 0`) or shrinks (`n < 0`) the caller's address space by `n`
/// bytes. Returns the previous size, or `-1` on failure.
pub fn growproc(table: &'static ProcTable, n: i32) -> i32 {
    let index = current();
    let p = table.get(index);
    // SAFETY: only the calling process touches its own `data` outside a
    // lock, and it is doing so now.
    let data = unsafe { &mut *p.data.get() };
    let old_sz = data.address_space.sz;
    let new_sz = if n > 0 {
        match vm::pt_grow(data.address_space.pagetable, old_sz, n as usize) {
            Ok(sz) => sz,
            Err(()) => return -1,
        }
    } else if n < 0 {
        vm::pt_shrink(data.address_space.pagetable, old_sz, (-n) as usize)
    } else {
        old_sz
    };
    data.address_space.sz = new_sz;
    old_sz as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::alloc_proc;

    fn boot_table() -> &'static ProcTable {
        let table: &'static ProcTable = Box::leak(Box::new(ProcTable::new()));
        table.init();
        crate::page::init();
        table.set_initial_proc(usize::MAX);
        table
    }

    fn become_current(index: usize) {
        crate::cpu::CPUS.current().set_proc(Some(index));
    }

    #[test]
    fn getpid_reports_the_calling_process() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        drop(guard);
        become_current(idx);
        assert_eq!(getpid(table), table.get(idx).pid());
    }

    #[test]
    fn set_cpu_rejects_an_invalid_id() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        drop(guard);
        become_current(idx);
        assert_eq!(set_cpu(table, crate::param::NCPU as i32), -1);
        assert_eq!(set_cpu(table, -1), -1);
    }

    #[test]
    fn get_cpu_reports_affiliated_cpu() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        drop(guard);
        table.get(idx).set_affiliated_cpu(3);
        become_current(idx);
        assert_eq!(get_cpu(table), 3);
    }

    #[test]
    fn cpu_process_count_matches_ready_len() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        drop(guard);
        table.ready[2].push(table, idx);
        assert_eq!(cpu_process_count(table, 2), 1);
        assert_eq!(cpu_process_count(table, crate::param::NCPU as i32), -1);
    }

    #[test]
    fn kill_surfaces_found_as_zero() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        drop(guard);
        let pid = table.get(idx).pid();
        assert_eq!(kill(table, pid), 0);
        assert_eq!(kill(table, 999_999), -1);
    }

    #[test]
    fn growproc_grows_and_shrinks_tracked_size() {
        let table = boot_table();
        let (idx, guard) = alloc_proc(table).unwrap();
        drop(guard);
        become_current(idx);
        assert_eq!(growproc(table, 100), 0);
        assert_eq!(growproc(table, -50), 100);
        let data = unsafe { &*table.get(idx).data.get() };
        assert_eq!(data.address_space.sz, 50);
    }
}
