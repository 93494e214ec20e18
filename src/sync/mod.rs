//! Lock-free primitives shared by the process table and the physical
//! allocator's refcounts: a compare-and-swap retry loop, and a CAS-based
//! monotonic id allocator built on top of it.

mod cas;

pub use cas::{cas_update, PidAllocator};
