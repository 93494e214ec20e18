//! Component B/D: the fixed-size process table and the four membership
//! lists (`unused`, `sleeping`, `zombie`, one `ready` list per cpu) threaded
//! through it.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicI32, Ordering};

use array_macro::array;

use crate::arch::Context;
use crate::list::{List, Nodes, NIL};
use crate::lock::{RawLock, RawSpinlock, Spinlock, SpinlockProtected};
use crate::param::{MAXPROCNAME, NCPU, NOFILE, NPROC};
use crate::sync::PidAllocator;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Procstate {
    Unused,
    Used,
    Runnable,
    Running,
    Sleeping,
    Zombie,
}

/// Opaque handle into the external file-table subsystem. This crate only
/// moves these around (`fork` duplicates them, `exit` drops them) and never
/// interprets them; see SPEC_FULL.md's external-interfaces note.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct FileHandle(pub usize);

/// Stand-in for the external VM subsystem's per-process page table and
/// trapframe. A real build wires this to `vm::UserMemory`; this crate's
/// lifecycle logic only needs to move/tear down a handle, never interpret
/// its bits.
pub struct AddressSpace {
    pub pagetable: usize,
    pub trapframe: usize,
    pub sz: usize,
}

impl AddressSpace {
    const fn new() -> Self {
        Self {
            pagetable: 0,
            trapframe: 0,
            sz: 0,
        }
    }
}

/// Fields guarded by `Proc::lock`.
pub struct ProcInner {
    pub state: Procstate,
    /// If non-zero, sleeping on this `WaitChannel` address.
    pub chan: usize,
    pub killed: bool,
    /// Exit status to be returned to the parent's `wait()`.
    pub xstate: i32,
}

/// Fields private to the process: nothing but the process itself (or
/// whoever is still constructing it, before it becomes visible on any
/// list) ever touches these, so no lock is needed.
pub struct ProcData {
    pub kstack: usize,
    pub address_space: AddressSpace,
    pub context: Context,
    pub open_files: [Option<FileHandle>; NOFILE],
    /// Opaque handle into the external inode-cache subsystem.
    pub cwd: Option<usize>,
}

impl ProcData {
    const fn new() -> Self {
        Self {
            kstack: 0,
            address_space: AddressSpace::new(),
            context: Context::zeroed(),
            open_files: [None; NOFILE],
            cwd: None,
        }
    }
}

/// One process-table slot.
pub struct Proc {
    pub index: usize,
    pub pid: AtomicI32,

    /// Guards `state`/`chan`/`killed`/`xstate`.
    pub lock: Spinlock<ProcInner>,

    /// Guards `next` and `affiliated_cpu` only. Never acquired while
    /// `lock` is held — see `list`'s module doc.
    pub walk_lock: RawSpinlock,
    next: UnsafeCell<i32>,
    affiliated_cpu: UnsafeCell<usize>,

    /// Guarded by the table's global `wait_lock`, not by `lock`: written by
    /// `fork`/`reparent`, read by `wait`'s parent/child scan, and those two
    /// operations must observe a consistent parent/child relationship
    /// across the whole table, not just one slot at a time.
    parent: UnsafeCell<MaybeUninit<SpinlockProtected<i32>>>,

    pub data: UnsafeCell<ProcData>,

    /// Process name, for `dump()`. Set once before the slot becomes
    /// RUNNABLE and read only for diagnostics afterward.
    name: UnsafeCell<[u8; MAXPROCNAME]>,
}

// SAFETY: every field with interior mutability is documented above with the
// lock that guards it; cross-thread access always goes through that lock.
unsafe impl Sync for Proc {}

impl Proc {
    const fn new(index: usize) -> Self {
        Self {
            index,
            pid: AtomicI32::new(0),
            lock: Spinlock::new(
                "proc",
                ProcInner {
                    state: Procstate::Unused,
                    chan: 0,
                    killed: false,
                    xstate: 0,
                },
            ),
            walk_lock: RawSpinlock::new("proc_walk"),
            next: UnsafeCell::new(NIL),
            affiliated_cpu: UnsafeCell::new(0),
            parent: UnsafeCell::new(MaybeUninit::uninit()),
            data: UnsafeCell::new(ProcData::new()),
            name: UnsafeCell::new([0; MAXPROCNAME]),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Relaxed)
    }

    /// # Safety
    /// Caller must hold `self.walk_lock`.
    pub unsafe fn affiliated_cpu_locked(&self) -> usize {
        unsafe { *self.affiliated_cpu.get() }
    }

    /// # Safety
    /// Caller must hold `self.walk_lock`.
    pub unsafe fn set_affiliated_cpu_locked(&self, cpu: usize) {
        unsafe { *self.affiliated_cpu.get() = cpu };
    }

    pub fn affiliated_cpu(&self) -> usize {
        self.walk_lock.acquire();
        // SAFETY: just acquired `walk_lock`.
        let cpu = unsafe { self.affiliated_cpu_locked() };
        self.walk_lock.release();
        cpu
    }

    pub fn set_affiliated_cpu(&self, cpu: usize) {
        self.walk_lock.acquire();
        // SAFETY: just acquired `walk_lock`.
        unsafe { self.set_affiliated_cpu_locked(cpu) };
        self.walk_lock.release();
    }

    pub fn parent(&self) -> &SpinlockProtected<i32> {
        // SAFETY: written once in `ProcTable::init`, before any concurrent
        // access is possible.
        unsafe { (*self.parent.get()).assume_init_ref() }
    }

    /// Process name as a UTF-8 lossily-decoded string, for `dump()`. A
    /// torn/racy read here is a cosmetic bug at worst, not a soundness one:
    /// the byte array is never read/written concurrently by anyone except
    /// the owning process and a debugger.
    pub fn name(&self) -> [u8; MAXPROCNAME] {
        unsafe { *self.name.get() }
    }

    pub fn set_name(&self, name: &[u8]) {
        let buf = unsafe { &mut *self.name.get() };
        *buf = [0; MAXPROCNAME];
        let n = name.len().min(MAXPROCNAME);
        buf[..n].copy_from_slice(&name[..n]);
    }
}

/// The process table. Exactly one instance exists, as a `'static`: the
/// self-referential `parent` fields (each pointing at `wait_lock`) can only
/// be wired up after the table has a stable address, in `init()`.
pub struct ProcTable {
    pub process_pool: [Proc; NPROC],
    pub pids: PidAllocator,

    /// Serializes reparenting and `wait()`'s parent/child observation.
    /// Acquired before any single process's `lock`, never after.
    pub wait_lock: RawSpinlock,

    pub unused: List<RawSpinlock>,
    pub sleeping: List<RawSpinlock>,
    pub zombie: List<RawSpinlock>,
    pub ready: [List<RawSpinlock>; NCPU],

    /// Index of `init`, the ancestor of every process; reparenting targets
    /// this slot. Set once by `ProcTable::init`.
    initial_proc: AtomicI32,
}

impl ProcTable {
    pub const fn new() -> Self {
        Self {
            process_pool: array![i => Proc::new(i); NPROC],
            pids: PidAllocator::new(1),
            wait_lock: RawSpinlock::new("wait_lock"),
            unused: List::new("unused", RawSpinlock::new("unused_walk")),
            sleeping: List::new("sleeping", RawSpinlock::new("sleeping_walk")),
            zombie: List::new("zombie", RawSpinlock::new("zombie_walk")),
            ready: array![_ => List::new("ready", RawSpinlock::new("ready_walk")); NCPU],
            initial_proc: AtomicI32::new(NIL),
        }
    }

    /// Must run exactly once at boot, before any hart but the boot hart is
    /// running, and before any other method on this table is called.
    /// Grounded on `procinit()`.
    pub fn init(&'static self) {
        for p in self.process_pool.iter() {
            // SAFETY: single-threaded boot-time initialization.
            unsafe {
                (*p.parent.get()).write(SpinlockProtected::new(&self.wait_lock, NIL));
            }
            self.unused.push(self, p.index);
        }
    }

    pub fn set_initial_proc(&self, index: usize) {
        self.initial_proc.store(index as i32, Ordering::Relaxed);
    }

    pub fn initial_proc(&self) -> usize {
        self.initial_proc.load(Ordering::Relaxed) as usize
    }

    pub fn get(&self, index: usize) -> &Proc {
        &self.process_pool[index]
    }

    pub fn ready_len(&self, cpu: usize) -> i32 {
        self.ready[cpu].len()
    }

    /// Permanently maps one kernel-stack page per slot. Unlike every other
    /// per-process resource (trapframe, pagetable), `kstack` is not
    /// acquired in `alloc_proc`/released in `free_proc` — it outlives
    /// every occupant of a slot, so it is set up once, here, at boot.
    /// Grounded on `proc.c`'s `proc_mapstacks`. Must run after `init()` and
    /// after `page::init()`, and is itself boot-time-only (no locking: no
    /// other hart is running yet).
    pub fn map_stacks(&'static self) {
        for p in self.process_pool.iter() {
            let page = crate::page::page_alloc().expect("map_stacks: out of pages");
            // SAFETY: boot time, single-threaded; no slot has been handed
            // out to any caller yet.
            unsafe { (*p.data.get()).kstack = crate::page::page_bytes(page).as_ptr() as usize };
        }
    }

    /// Ctrl-P-style diagnostic: one line per non-`Unused` slot naming its
    /// pid, state, and process name. Grounded on `proc.c`'s `procdump`.
    pub fn dump(&self) {
        for p in self.process_pool.iter() {
            let state = {
                let guard = p.lock.lock();
                guard.state
            };
            if state == Procstate::Unused {
                continue;
            }
            let name = p.name();
            let name = core::str::from_utf8(&name)
                .unwrap_or("?")
                .trim_end_matches('\u{0}');
            crate::println!("{} {:?} {}", p.pid(), state, name);
        }
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes for ProcTable {
    type Lock = RawSpinlock;

    fn walk_lock(&self, index: usize) -> &RawSpinlock {
        &self.process_pool[index].walk_lock
    }

    unsafe fn next(&self, index: usize) -> i32 {
        unsafe { *self.process_pool[index].next.get() }
    }

    unsafe fn set_next(&self, index: usize, next: i32) {
        unsafe { *self.process_pool[index].next.get() = next };
    }
}
