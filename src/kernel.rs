//! Boot wiring: the single `'static` process table every hart shares, and
//! the once-at-boot sequence that brings it up before any hart enters
//! `proc::scheduler`. Grounded on the teacher's `kernel_main.rs`, reduced
//! to the subset this crate's components actually need (page allocator,
//! process table, kernel stacks) — UART/disk/filesystem/trap init belong
//! to the external collaborators spec.md scopes out.

use crate::page;
use crate::proc::table::ProcTable;

pub static PROCS: ProcTable = ProcTable::new();

/// Runs exactly once, on the boot hart, before any other hart is released
/// to run code. Grounded on `kernel_main.rs`'s boot-hart branch of
/// `kernel_main`.
///
/// # Safety
/// Must not run concurrently with itself, and must complete before any
/// other hart calls `proc::scheduler`.
pub unsafe fn boot_init() {
    page::init();
    PROCS.init();
    PROCS.map_stacks();
}

/// Every hart, including the boot hart, enters here after `boot_init` (on
/// the boot hart) or immediately (on every other hart). Never returns.
pub fn main() -> ! {
    crate::proc::scheduler(&PROCS)
}
