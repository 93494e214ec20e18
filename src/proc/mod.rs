//! The process subsystem: components B, D (process table + membership
//! lists), E (lifecycle), F (sleep/wake), G (per-CPU scheduler), and H
//! (load balancer) from spec.md section 4, all threaded through the
//! single fixed-size `ProcTable`.
//!
//! Split the way the teacher splits `proc.rs` into focused files, except
//! generalized from one global run queue to per-CPU `ready` queues with
//! work-stealing (spec.md's central departure from the source algorithm).

pub mod balance;
pub mod lifecycle;
pub mod scheduler;
pub mod sleep;
pub mod table;

pub use lifecycle::{alloc_proc, exit, fork, free_proc, kill, reparent, wait};
pub use scheduler::{forkret, forkret_trampoline, proc_yield, sched, scheduler, steal_proc};
pub use sleep::{sleep, wakeup, WaitChannel};
pub use table::{FileHandle, Proc, ProcInner, ProcTable, Procstate};
