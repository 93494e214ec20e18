//! Component H: the load balancer, simplified by one observation about
//! this crate's `List`: its `counter` is kept exactly in sync with real
//! membership by `push`/`pop_front`/`drain_matching` (see `list`'s module
//! doc), so there is no separate speculative reservation counter to CAS
//! ahead of the real push — reading `ready[k].len()` for every `k` and
//! taking the minimum already gives an up-to-the-last-completed-operation
//! count. The result is still only a placement *hint*: by the time the
//! caller pushes, another concurrent `fork`/`wakeup`/`kill` may have
//! picked, and pushed to, the same CPU. That is an approximate-by-design
//! load signal, not an exact reservation.

use crate::param::NCPU;
use crate::proc::table::ProcTable;

/// Returns the id of the CPU whose ready queue currently looks shortest.
/// Ties favor the lowest id.
pub fn least_loaded_cpu(table: &ProcTable) -> usize {
    let mut best_cpu = 0;
    let mut best_len = table.ready_len(0);
    for cpu in 1..NCPU {
        let len = table.ready_len(cpu);
        if len < best_len {
            best_len = len;
            best_cpu = cpu;
        }
    }
    best_cpu
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::table::ProcTable;

    #[test]
    fn picks_the_emptiest_queue() {
        static TABLE: ProcTable = ProcTable::new();
        TABLE.init();
        for i in 0..3 {
            TABLE.ready[1].push(&TABLE, TABLE.unused.pop_front(&TABLE).unwrap());
            let _ = i;
        }
        // ready[1] now has 3, every other queue has 0; the balancer must
        // not pick 1.
        assert_ne!(least_loaded_cpu(&TABLE), 1);
    }

    #[test]
    fn ties_favor_the_lowest_id() {
        static TABLE: ProcTable = ProcTable::new();
        TABLE.init();
        assert_eq!(least_loaded_cpu(&TABLE), 0);
    }
}
