//! External collaborator: the physical page allocator. The process
//! lifecycle and the stub VM layer in `vm` both need is a page to hand out
//! and a refcount to share it across `fork`; spec.md scopes the allocator
//! itself as outside this crate's named components, so this is a small
//! stand-in, not a real physical memory manager.
//!
//! Grounded on `kalloc.c`: a spinlock-protected freelist, plus the CAS
//! refcount retry loop already built in `sync::cas_update` for exactly
//! this purpose (`reference_add`/`reference_remove`).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI32, Ordering};

use array_macro::array;

use crate::lock::{RawLock, RawSpinlock};
use crate::sync::cas_update;

pub const PGSIZE: usize = 4096;

/// Sentinel for "no next free page" / page not currently free.
const NIL: i32 = -1;

/// Total physical pages this stand-in allocator manages. A real build
/// sizes this from detected RAM; this crate only needs enough to back
/// `NPROC` kernel stacks and page tables.
pub const NPAGE: usize = 256;

#[repr(align(4096))]
struct Page {
    inner: UnsafeCell<[u8; PGSIZE]>,
}

// SAFETY: a page is only ever touched through the index `page_alloc`
// hands out and `page_free` reclaims; the allocator never interprets its
// contents.
unsafe impl Sync for Page {}

struct PagePool {
    pages: [Page; NPAGE],
    refcount: [AtomicI32; NPAGE],
    next_free: [UnsafeCell<i32>; NPAGE],
    lock: RawSpinlock,
    free_head: UnsafeCell<i32>,
}

// SAFETY: `next_free`/`free_head` are only touched while holding `lock`;
// `refcount` is a plain atomic; `pages` is guarded per the `Page` impl above.
unsafe impl Sync for PagePool {}

impl PagePool {
    const fn new() -> Self {
        Self {
            pages: array![_ => Page { inner: UnsafeCell::new([0; PGSIZE]) }; NPAGE],
            refcount: array![_ => AtomicI32::new(0); NPAGE],
            next_free: array![_ => UnsafeCell::new(NIL); NPAGE],
            lock: RawSpinlock::new("kmem"),
            free_head: UnsafeCell::new(NIL),
        }
    }

    fn init(&self) {
        self.lock.acquire();
        for i in (0..NPAGE).rev() {
            // SAFETY: holding `lock`, single-threaded at this point anyway.
            unsafe { *self.next_free[i].get() = *self.free_head.get() };
            unsafe { *self.free_head.get() = i as i32 };
        }
        self.lock.release();
    }

    fn alloc(&self) -> Option<usize> {
        self.lock.acquire();
        // SAFETY: holding `lock`.
        let head = unsafe { *self.free_head.get() };
        if head == NIL {
            self.lock.release();
            return None;
        }
        let head = head as usize;
        // SAFETY: holding `lock`.
        unsafe { *self.free_head.get() = *self.next_free[head].get() };
        self.lock.release();
        self.refcount[head].store(1, Ordering::Relaxed);
        // SAFETY: `head` was just removed from the free list, so nobody
        // else holds this index.
        unsafe { (*self.pages[head].inner.get()).fill(0) };
        Some(head)
    }

    fn reclaim(&self, index: usize) {
        self.lock.acquire();
        // SAFETY: holding `lock`.
        unsafe {
            *self.next_free[index].get() = *self.free_head.get();
            *self.free_head.get() = index as i32;
        }
        self.lock.release();
    }
}

static POOL: PagePool = PagePool::new();

/// Must run once at boot before any call to `page_alloc`.
pub fn init() {
    POOL.init();
}

/// Hands out a zeroed page with refcount 1, or `None` if the pool is
/// exhausted.
pub fn page_alloc() -> Option<usize> {
    POOL.alloc()
}

/// Bytes of the page at `index`.
///
/// # Safety
/// Caller must hold a reference obtained from `page_alloc` (or a
/// `refcount_inc` on one) that has not yet been matched by a
/// `refcount_dec` that reached zero.
pub unsafe fn page_bytes(index: usize) -> &'static mut [u8; PGSIZE] {
    unsafe { &mut *POOL.pages[index].inner.get() }
}

pub fn refcount_get(index: usize) -> i32 {
    POOL.refcount[index].load(Ordering::Relaxed)
}

/// Adds a reference, e.g. when `fork` maps a shared page into the child.
pub fn refcount_inc(index: usize) {
    cas_update(&POOL.refcount[index], |old| old + 1);
}

/// Removes a reference, reclaiming the page to the free list once the
/// count reaches zero. Grounded on `kfree`'s refcount check.
pub fn refcount_dec(index: usize) -> i32 {
    let new = cas_update(&POOL.refcount[index], |old| old - 1);
    if new == 0 {
        POOL.reclaim(index);
    }
    new
}

/// Alias for `refcount_dec`, named to match spec.md section 6's external
/// interface (`page_free(pa)`): dropping a reference, reclaiming the page
/// once nothing else holds it.
pub fn page_free(index: usize) {
    let _ = refcount_dec(index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_is_reusable() {
        init();
        let a = page_alloc().unwrap();
        refcount_dec(a);
        let b = page_alloc().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shared_page_survives_until_last_ref_drops() {
        init();
        let idx = page_alloc().unwrap();
        refcount_inc(idx);
        assert_eq!(refcount_get(idx), 2);
        refcount_dec(idx);
        assert_eq!(refcount_get(idx), 1);
        unsafe { page_bytes(idx)[0] = 7 };
        refcount_dec(idx);
        assert_eq!(refcount_get(idx), 0);
    }

    #[test]
    fn allocated_pages_start_zeroed() {
        init();
        let idx = page_alloc().unwrap();
        assert!(unsafe { page_bytes(idx).iter().all(|&b| b == 0) });
    }
}
