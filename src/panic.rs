//! The fatal-panic path spec.md section 7 requires for invariant
//! violations (double RUNNING, wrong lock held in `sched`, `init` exiting):
//! print the message, freeze, and never return. Grounded on the teacher's
//! `printf.rs` panic handler.

use core::sync::atomic::{AtomicBool, Ordering};

/// Set once a panic is in flight, so a second hart that faults while this
/// one is already printing doesn't interleave its own message.
pub static PANICKED: AtomicBool = AtomicBool::new(false);

#[cfg(not(test))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo<'_>) -> ! {
    PANICKED.store(true, Ordering::Release);
    crate::println!("{}", info);
    crate::utils::spin_loop()
}
