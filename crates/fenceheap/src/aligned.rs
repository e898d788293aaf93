//! The page-aligned allocation engine, built from the same split/merge
//! primitives as the unaligned path.

use core::ptr;

use log::{debug, warn};

use crate::chunk::{CallSite, ChunkRef, CHUNK_OVERHEAD};
use crate::heap::HeapCore;
use crate::util::{align_up, is_aligned, PAGE_SIZE};

impl HeapCore {
    /// Allocate `size` bytes whose payload starts on a page boundary.
    ///
    /// Requires at least two committed pages (policy limit). Scans free
    /// chunks in order: a payload already on a boundary is taken directly;
    /// otherwise the first page boundary inside the chunk's span is used if
    /// there is room for a control block before it and `size` bytes after
    /// it, carving with a double split. If the aligned portion cannot be
    /// trimmed to exact size, the first split is undone before moving on,
    /// so the heap stays consistent. Never grows the region.
    pub(crate) fn malloc_aligned_inner(&mut self, size: usize, site: CallSite) -> *mut u8 {
        if !self.is_set {
            debug!("aligned malloc of {size} bytes before setup");
            return ptr::null_mut();
        }
        if self.pages < 2 {
            debug!("aligned allocation requires at least two committed pages");
            return ptr::null_mut();
        }
        if size == 0 {
            return ptr::null_mut();
        }

        let mut cursor = ChunkRef::from_raw(self.head);
        while let Some(chunk) = cursor {
            let header = unsafe { chunk.header() };
            cursor = ChunkRef::from_raw(header.next);
            if header.allocated {
                continue;
            }

            let payload = chunk.payload() as usize;

            // Fast path: the payload already lands on a page boundary.
            if is_aligned(payload, PAGE_SIZE) {
                if header.size == size || header.size > size + CHUNK_OVERHEAD {
                    return unsafe { self.commit_alloc(chunk, size, site) };
                }
                continue;
            }

            // Slow path: a page boundary strictly inside the free span.
            let boundary = align_up(payload, PAGE_SIZE);
            let span_end = payload + header.size;
            if boundary >= span_end {
                continue;
            }
            let distance = boundary - payload;
            if distance < CHUNK_OVERHEAD || span_end - boundary < size {
                continue;
            }

            unsafe {
                // First split: carve off the unaligned leading remainder,
                // left free. The carved chunk's control block ends exactly
                // at the boundary, so its payload is page-aligned.
                if self.split(chunk, distance - CHUNK_OVERHEAD).is_none() {
                    continue;
                }
                let aligned = match ChunkRef::from_raw(chunk.header().next) {
                    Some(aligned) => aligned,
                    None => continue,
                };
                let aligned_size = aligned.header().size;
                if aligned_size == size || aligned_size > size + CHUNK_OVERHEAD {
                    return self.commit_alloc(aligned, size, site);
                }
                // The second split would fail: undo the first one.
                self.merge(chunk, aligned, true);
            }
        }
        debug!("no free chunk can supply an aligned region of {size} bytes");
        ptr::null_mut()
    }

    /// Page-aligned calloc: overflow-checked multiply, then zero-fill.
    pub(crate) fn calloc_aligned_inner(
        &mut self,
        count: usize,
        size: usize,
        site: CallSite,
    ) -> *mut u8 {
        let total = match count.checked_mul(size) {
            Some(total) => total,
            None => {
                warn!("aligned calloc({count}, {size}) overflows");
                return ptr::null_mut();
            }
        };
        let payload = self.malloc_aligned_inner(total, site);
        if !payload.is_null() {
            unsafe { ptr::write_bytes(payload, 0, total) };
        }
        payload
    }
}
