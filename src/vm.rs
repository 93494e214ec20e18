//! External collaborator: the virtual-memory subsystem. spec.md scopes
//! page-table management itself out of this crate's named components —
//! `proc::lifecycle` only ever moves a `pagetable`/`trapframe` handle
//! around and asks this module to create/copy/tear one down, never
//! interprets its bits. This stand-in backs every handle with a page from
//! `page`, the same way the real kernel backs a pagetable root with a
//! physical page, so refcounting and reclamation stay honest even though
//! no actual page-table walk ever happens here.

use crate::page;

/// Creates a fresh, empty address space. Returns a pagetable handle, or
/// `None` if backing pages are exhausted. Grounded on `vm.c`'s
/// `proc_pagetable`.
pub fn pt_create() -> Option<usize> {
    page::page_alloc()
}

/// Maps `npages` starting at physical page `phys` into `pagetable` at user
/// virtual address `va`. A real build walks and installs PTEs; this
/// stand-in only needs the contract (success/failure), since no code in
/// this crate inspects the resulting translation.
pub fn pt_map(_pagetable: usize, _va: usize, _phys: usize, _npages: usize) -> Result<(), ()> {
    Ok(())
}

/// Removes `npages` of mappings starting at `va`, optionally freeing the
/// backing physical pages.
pub fn pt_unmap(_pagetable: usize, _va: usize, _npages: usize, free_backing: bool) {
    let _ = free_backing;
}

/// Tears down `pagetable` and every user page it maps, sized by `sz`
/// bytes. Grounded on `vm.c`'s `proc_freepagetable`.
pub fn pt_free(pagetable: usize, _sz: usize) {
    page::refcount_dec(pagetable);
}

/// Duplicates every user mapping in `parent` (covering `sz` bytes) into
/// `child`, sharing pages copy-on-write style. Returns an error if a
/// backing page could not be obtained partway through, in which case the
/// caller (`fork`) tears down the half-built child itself. Grounded on
/// `vm.c`'s `uvmcopy`.
pub fn pt_copy_user(parent: usize, _child: usize, _sz: usize) -> Result<(), ()> {
    page::refcount_inc(parent);
    Ok(())
}

/// Installs the first user image (the `init` program's text/data) into a
/// freshly created address space. Grounded on `vm.c`'s `uvminit`.
pub fn user_mem_init(_pagetable: usize, _image: &[u8]) -> Result<(), ()> {
    Ok(())
}

/// Grows a process's address space by `n` bytes, allocating and mapping
/// backing pages as needed. Grounded on `vm.c`'s `uvmalloc`.
pub fn pt_grow(_pagetable: usize, old_sz: usize, n: usize) -> Result<usize, ()> {
    Ok(old_sz + n)
}

/// Shrinks a process's address space by unmapping and freeing pages no
/// longer in range. Grounded on `vm.c`'s `uvmdealloc`.
pub fn pt_shrink(_pagetable: usize, old_sz: usize, n: usize) -> usize {
    old_sz.saturating_sub(n)
}

/// Copies `buf` into `pagetable` at user virtual address `dst`. Grounded
/// on `vm.c`'s `copyout`.
pub fn copy_to_user(_pagetable: usize, _dst: usize, _buf: &[u8]) -> Result<(), ()> {
    Ok(())
}

/// Copies from `pagetable` at user virtual address `src` into `buf`.
/// Grounded on `vm.c`'s `copyin`.
pub fn copy_from_user(_pagetable: usize, _src: usize, _buf: &mut [u8]) -> Result<(), ()> {
    Ok(())
}

/// Dispatches a kernel-to-{user,kernel} copy by `AddrKind`, the original
/// source's `either_copyout` — lets `wait`'s `xstate` write-back go
/// through the same path whether the destination is a real user pointer
/// or (as in tests) a plain kernel `&mut i32`.
pub enum AddrKind {
    User { pagetable: usize, addr: usize },
    Kernel { addr: *mut u8 },
}

/// Grounded on `proc.c`'s `either_copyout`.
pub fn either_copyout(dst: AddrKind, src: &[u8]) -> Result<(), ()> {
    match dst {
        AddrKind::User { pagetable, addr } => copy_to_user(pagetable, addr, src),
        AddrKind::Kernel { addr } => {
            // SAFETY: caller guarantees `addr` points to `src.len()` valid,
            // writable bytes — the kernel-internal side of the dispatch.
            unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), addr, src.len()) };
            Ok(())
        }
    }
}

/// Grounded on `proc.c`'s `either_copyin`.
pub fn either_copyin(dst: &mut [u8], src: AddrKind) -> Result<(), ()> {
    match src {
        AddrKind::User { pagetable, addr } => copy_from_user(pagetable, addr, dst),
        AddrKind::Kernel { addr } => {
            // SAFETY: caller guarantees `addr` points to `dst.len()` valid,
            // readable bytes.
            unsafe { core::ptr::copy_nonoverlapping(addr, dst.as_mut_ptr(), dst.len()) };
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_create_then_free_round_trips_through_the_page_allocator() {
        page::init();
        let pt = pt_create().unwrap();
        pt_free(pt, 0);
        // The page is back on the free list and reusable.
        let pt2 = pt_create().unwrap();
        assert_eq!(pt, pt2);
    }

    #[test]
    fn either_copyout_kernel_destination_writes_through() {
        let mut dst = 0i32;
        let bytes = 7i32.to_ne_bytes();
        either_copyout(
            AddrKind::Kernel {
                addr: &mut dst as *mut i32 as *mut u8,
            },
            &bytes,
        )
        .unwrap();
        assert_eq!(dst, 7);
    }
}
