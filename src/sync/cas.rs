use core::sync::atomic::{AtomicI32, Ordering};

/// Applies `f` to the current value of `cell` and stores the result,
/// retrying on contention. Returns the value that was stored.
///
/// Grounded on the `cas()` retry loops in `kalloc.c`'s `reference_add`/
/// `reference_remove` (load old, compute new, retry the exchange until it
/// sticks) rather than a single `fetch_add`, since some callers need an
/// arbitrary update function (e.g. saturating decrement).
pub fn cas_update<F: Fn(i32) -> i32>(cell: &AtomicI32, f: F) -> i32 {
    let mut old = cell.load(Ordering::Relaxed);
    loop {
        let new = f(old);
        match cell.compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return new,
            Err(cur) => old = cur,
        }
    }
}

/// Monotonically increasing id allocator, the Rust analogue of
/// `allocpid()`'s `do { pid = nextpid; } while(cas(&nextpid, pid, pid+1));`
/// loop in `proc.c`.
pub struct PidAllocator {
    next: AtomicI32,
}

impl PidAllocator {
    pub const fn new(start: i32) -> Self {
        Self {
            next: AtomicI32::new(start),
        }
    }

    /// Returns a fresh id, never returned before and never returned again.
    pub fn alloc(&self) -> i32 {
        let mut pid = self.next.load(Ordering::Relaxed);
        loop {
            match self.next.compare_exchange_weak(
                pid,
                pid + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return pid,
                Err(cur) => pid = cur,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pid_allocator_never_repeats_under_contention() {
        let alloc = Arc::new(PidAllocator::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || (0..200).map(|_| alloc.alloc()).collect::<Vec<_>>())
            })
            .collect();
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "pid allocator handed out a duplicate");
    }

    #[test]
    fn cas_update_applies_function_exactly_once_per_caller() {
        let counter = AtomicI32::new(0);
        let results: Vec<_> = (0..5).map(|_| cas_update(&counter, |old| old + 1)).collect();
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        let mut sorted = results;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5]);
    }
}
