//! The allocation and deallocation engines: best-fit search, malloc with
//! bounded grow-and-retry, calloc, realloc, and free with coalescing.

use core::ptr;

use log::{debug, trace, warn};

use crate::chunk::{CallSite, ChunkRef, CHUNK_OVERHEAD};
use crate::classify::PointerType;
use crate::heap::HeapCore;

impl HeapCore {
    // ------------------------------------------------------------------
    // Best-fit search
    // ------------------------------------------------------------------

    /// Scan the chunk list in order. An exact size match returns
    /// immediately; otherwise the smallest free chunk that can legally be
    /// split wins, with ties broken in favor of the earlier chunk.
    pub(crate) fn find_free_chunk(&self, size: usize) -> Option<ChunkRef> {
        let mut best: Option<(usize, ChunkRef)> = None;
        let mut cursor = ChunkRef::from_raw(self.head);
        while let Some(chunk) = cursor {
            let header = unsafe { chunk.header() };
            if !header.allocated {
                if header.size == size {
                    return Some(chunk);
                }
                if header.size > size + CHUNK_OVERHEAD
                    && best.map_or(true, |(best_size, _)| header.size < best_size)
                {
                    best = Some((header.size, chunk));
                }
            }
            cursor = ChunkRef::from_raw(header.next);
        }
        best.map(|(_, chunk)| chunk)
    }

    /// Mark a found candidate allocated, splitting to exact size first if
    /// it is oversized, and hand out its payload.
    ///
    /// # Safety
    /// `chunk` must be a live free chunk that is an exact match or a legal
    /// split candidate for `size`, and the lock must be held.
    pub(crate) unsafe fn commit_alloc(
        &mut self,
        chunk: ChunkRef,
        size: usize,
        site: CallSite,
    ) -> *mut u8 {
        let target = match self.split(chunk, size) {
            Some(target) => target,
            None => return ptr::null_mut(),
        };
        let mut header = target.header();
        header.allocated = true;
        header.debug_line = site.line;
        header.debug_file = site.file;
        target.store(&header);
        target.stamp();
        trace!("allocated {} bytes at {:p}", size, target.payload());
        target.payload()
    }

    // ------------------------------------------------------------------
    // malloc / calloc / realloc / free
    // ------------------------------------------------------------------

    /// Allocate `size` payload bytes, growing the region once if the first
    /// search comes up empty. Null on failure, heap unchanged.
    pub(crate) fn malloc_inner(&mut self, size: usize, site: CallSite) -> *mut u8 {
        if !self.is_set {
            debug!("malloc of {size} bytes before setup");
            return ptr::null_mut();
        }
        if size == 0 {
            return ptr::null_mut();
        }
        let mut grown = false;
        loop {
            if let Some(chunk) = self.find_free_chunk(size) {
                return unsafe { self.commit_alloc(chunk, size, site) };
            }
            if grown || !unsafe { self.grow_for(size) } {
                return ptr::null_mut();
            }
            grown = true;
        }
    }

    /// Allocate `count * size` zero-filled bytes. Fails fast on overflow.
    pub(crate) fn calloc_inner(&mut self, count: usize, size: usize, site: CallSite) -> *mut u8 {
        let total = match count.checked_mul(size) {
            Some(total) => total,
            None => {
                warn!("calloc({count}, {size}) overflows");
                return ptr::null_mut();
            }
        };
        let payload = self.malloc_inner(total, site);
        if !payload.is_null() {
            unsafe { ptr::write_bytes(payload, 0, total) };
        }
        payload
    }

    /// Resize an allocation, in place where the chunk geometry allows it.
    ///
    /// With `aligned`, the move fallback allocates page-aligned; the
    /// in-place paths keep the payload address, so alignment survives them
    /// either way.
    pub(crate) fn realloc_inner(
        &mut self,
        payload: *mut u8,
        size: usize,
        site: CallSite,
        aligned: bool,
    ) -> *mut u8 {
        if payload.is_null() {
            return if aligned {
                self.malloc_aligned_inner(size, site)
            } else {
                self.malloc_inner(size, site)
            };
        }
        if size == 0 {
            self.free_inner(payload);
            return ptr::null_mut();
        }
        if self.classify(payload) != PointerType::Valid {
            debug!("realloc ignored: {payload:p} is not a valid payload start");
            return ptr::null_mut();
        }

        unsafe {
            let chunk = ChunkRef::of_payload(payload);
            let header = chunk.header();
            if header.size == size {
                return payload;
            }

            // In-place shrink: enough slack for a standalone free remainder,
            // which split leaves coalescible with a free right neighbor.
            if header.size > size + CHUNK_OVERHEAD {
                self.split(chunk, size);
                return payload;
            }

            // In-place growth into an immediately following free neighbor,
            // but only when the merged chunk can then be trimmed to exact
            // size (or already is it).
            if let Some(next) = ChunkRef::from_raw(header.next) {
                let next_header = next.header();
                if !next_header.allocated {
                    let merged = header.size + next_header.size + CHUNK_OVERHEAD;
                    if (merged == size || merged > size + CHUNK_OVERHEAD)
                        && self.merge(chunk, next, false).is_some()
                    {
                        self.split(chunk, size);
                        return payload;
                    }
                }
            }
        }

        // Move fallback: allocate fresh, copy the surviving bytes, free the
        // original. On allocation failure the original is left untouched.
        let fresh = if aligned {
            self.malloc_aligned_inner(size, site)
        } else {
            self.malloc_inner(size, site)
        };
        if fresh.is_null() {
            return ptr::null_mut();
        }
        unsafe {
            let old_size = ChunkRef::of_payload(payload).header().size;
            ptr::copy_nonoverlapping(payload, fresh, old_size.min(size));
        }
        self.free_inner(payload);
        fresh
    }

    /// Free the chunk owning `payload` and coalesce with free neighbors,
    /// left then right. A pointer that does not classify as a valid payload
    /// start is silently ignored.
    pub(crate) fn free_inner(&mut self, payload: *mut u8) {
        if self.classify(payload) != PointerType::Valid {
            debug!("free ignored: {payload:p} is not a valid payload start");
            return;
        }
        unsafe {
            let mut chunk = ChunkRef::of_payload(payload);
            let mut header = chunk.header();
            trace!("freed {} bytes at {:p}", header.size, payload);
            header.allocated = false;
            header.debug_line = 0;
            header.debug_file = None;
            chunk.store(&header);
            chunk.stamp();

            if let Some(prev) = ChunkRef::from_raw(header.prev) {
                if !prev.header().allocated {
                    if let Some(merged) = self.merge(prev, chunk, true) {
                        chunk = merged;
                    }
                }
            }
            let header = chunk.header();
            if let Some(next) = ChunkRef::from_raw(header.next) {
                if !next.header().allocated {
                    self.merge(chunk, next, true);
                }
            }
        }
        self.stamp_heap();
    }
}
