//! The address-space primitive the heap is built on.
//!
//! The heap consumes a single operation: "extend the current boundary by N
//! bytes" (N may be negative to shrink), returning the previous boundary.
//! [`SystemGrower`] implements it over one anonymous reservation so the
//! managed region never moves, which is the contract every implementation
//! must honor.

use crate::util::{align_down, align_up, PAGE_SIZE};
use core::ptr;

/// Default cap on the default grower's reservation: 256 MiB.
pub const DEFAULT_LIMIT_BYTES: usize = 256 * 1024 * 1024;

/// Grows and shrinks a contiguous managed region by whole bytes.
///
/// Implementations must extend in place: the bytes handed out by earlier
/// calls keep their addresses for the lifetime of the grower. Returning
/// `None` must leave the boundary where it was.
pub trait AddressSpaceGrower {
    /// Move the boundary by `delta` bytes (negative shrinks) and return the
    /// previous boundary, or `None` if the request cannot be satisfied.
    fn extend(&mut self, delta: isize) -> Option<*mut u8>;
}

/// An sbrk-style grower over a single anonymous mapping.
///
/// The full reservation is mapped `PROT_NONE` up front; `extend` commits and
/// decommits pages with `mprotect` as the boundary moves, so the region is
/// contiguous and never relocates.
pub struct SystemGrower {
    base: *mut u8,
    reserved: usize,
    brk: usize,
}

unsafe impl Send for SystemGrower {}

impl SystemGrower {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT_BYTES)
    }

    /// A grower whose boundary can never move more than `limit` bytes past
    /// the base. Useful for making exhaustion deterministic.
    pub fn with_limit(limit: usize) -> Self {
        SystemGrower {
            base: ptr::null_mut(),
            reserved: align_up(limit.max(PAGE_SIZE), PAGE_SIZE),
            brk: 0,
        }
    }

    fn ensure_reserved(&mut self) -> bool {
        if !self.base.is_null() {
            return true;
        }
        self.base = unsafe { map_reservation(self.reserved) };
        !self.base.is_null()
    }
}

impl Default for SystemGrower {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpaceGrower for SystemGrower {
    fn extend(&mut self, delta: isize) -> Option<*mut u8> {
        if !self.ensure_reserved() {
            return None;
        }
        let new_brk = if delta >= 0 {
            self.brk.checked_add(delta as usize)?
        } else {
            self.brk.checked_sub(delta.unsigned_abs())?
        };
        if new_brk > self.reserved {
            return None;
        }
        unsafe {
            if new_brk > self.brk {
                let lo = align_down(self.brk, PAGE_SIZE);
                let hi = align_up(new_brk, PAGE_SIZE);
                if !commit(self.base.add(lo), hi - lo) {
                    return None;
                }
            } else if new_brk < self.brk {
                let lo = align_up(new_brk, PAGE_SIZE);
                let hi = align_up(self.brk, PAGE_SIZE);
                if hi > lo {
                    decommit(self.base.add(lo), hi - lo);
                }
            }
        }
        let previous = self.base.wrapping_add(self.brk);
        self.brk = new_brk;
        Some(previous)
    }
}

impl Drop for SystemGrower {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.reserved);
            }
        }
    }
}

/// Map an inaccessible anonymous reservation.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
unsafe fn map_reservation(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Mark part of the reservation read-write.
///
/// # Safety
/// Region must lie inside the reservation and be page-aligned.
unsafe fn commit(ptr: *mut u8, size: usize) -> bool {
    libc::mprotect(
        ptr as *mut libc::c_void,
        size,
        libc::PROT_READ | libc::PROT_WRITE,
    ) == 0
}

/// Mark part of the reservation inaccessible again and let the kernel
/// reclaim the physical pages.
///
/// # Safety
/// Region must lie inside the reservation and be page-aligned.
unsafe fn decommit(ptr: *mut u8, size: usize) {
    libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_DONTNEED);
    libc::mprotect(ptr as *mut libc::c_void, size, libc::PROT_NONE);
}
