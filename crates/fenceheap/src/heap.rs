//! The heap control structure, its lifecycle, and the two structural edits
//! of the chunk list.
//!
//! Everything here assumes the caller holds the heap's lock: the public
//! surface in [`crate::api`] acquires it and every internal helper takes
//! `&mut HeapCore` directly, so no operation ever re-enters the lock.

use core::ptr;

use log::{debug, trace, warn};

use crate::api::{HeapError, SetupStatus};
use crate::chunk::{ChunkHeader, ChunkRef, CHUNK_OVERHEAD, END_FENCE, END_FENCE_BYTES};
use crate::config::HeapConfig;
use crate::grower::AddressSpaceGrower;
use crate::util::{align_up, PAGE_SIZE};

/// The single heap instance behind a [`crate::Heap`] handle.
///
/// `head`/`tail` bound the intrusive chunk list, `end_fence` points at the
/// trailing fence integer, `base` is the start of the managed region, and
/// `checksum` covers the control fields themselves.
pub(crate) struct HeapCore {
    pub head: *mut u8,
    pub tail: *mut u8,
    pub end_fence: *mut u8,
    pub base: *mut u8,
    pub pages: usize,
    pub chunks: usize,
    pub checksum: u32,
    pub is_set: bool,
    pub grower: Box<dyn AddressSpaceGrower + Send>,
    pub config: HeapConfig,
}

unsafe impl Send for HeapCore {}
unsafe impl Sync for HeapCore {}

impl HeapCore {
    pub fn new(config: HeapConfig, grower: Box<dyn AddressSpaceGrower + Send>) -> Self {
        HeapCore {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            end_fence: ptr::null_mut(),
            base: ptr::null_mut(),
            pages: 0,
            chunks: 0,
            checksum: 0,
            is_set: false,
            grower,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Acquire the initial pages and install one free chunk spanning the
    /// whole region. Idempotent.
    pub fn setup(&mut self) -> Result<SetupStatus, HeapError> {
        if self.is_set {
            debug!("heap is already set up");
            return Ok(SetupStatus::AlreadyInitialized);
        }
        let pages = self.config.initial_pages.max(1);
        let bytes = pages * PAGE_SIZE;
        let base = self
            .grower
            .extend(bytes as isize)
            .ok_or(HeapError::AddressSpaceExhausted)?;

        self.base = base;
        self.head = base;
        self.tail = base;
        self.pages = pages;
        self.chunks = 1;
        self.is_set = true;

        let span = bytes - CHUNK_OVERHEAD - END_FENCE_BYTES;
        unsafe {
            let head = ChunkRef::new(base);
            head.store(&ChunkHeader::new_free(span, ptr::null_mut(), ptr::null_mut()));
            head.stamp();
            self.refresh_end_fence();
        }
        self.stamp_heap();
        debug!("heap set up: {} page(s), {} free bytes", pages, span);
        Ok(SetupStatus::Initialized)
    }

    /// Release every committed page and return to the uninitialized state.
    ///
    /// Refuses while corrupted. Without `force`, refuses while live
    /// allocations remain; with it, outstanding blocks are discarded.
    pub fn delete(&mut self, force: bool) -> Result<(), HeapError> {
        if !self.is_set {
            return Ok(());
        }
        if let Err(fault) = self.validate_inner() {
            warn!("teardown refused: {fault}");
            return Err(HeapError::Corrupted(fault));
        }
        let live = self.used_blocks_count();
        if live > 0 {
            if !force {
                warn!("teardown refused: {live} live allocation(s) remain");
                return Err(HeapError::LiveAllocations(live));
            }
            debug!("forced teardown discards {live} live allocation(s)");
        }
        let total = self.pages * PAGE_SIZE;
        if self.grower.extend(-(total as isize)).is_none() {
            warn!("teardown failed: could not release {total} bytes");
            return Err(HeapError::AddressSpaceExhausted);
        }
        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
        self.end_fence = ptr::null_mut();
        self.base = ptr::null_mut();
        self.pages = 0;
        self.chunks = 0;
        self.is_set = false;
        self.stamp_heap();
        debug!("heap torn down, {total} bytes released");
        Ok(())
    }

    /// Tear down (if set up) and set up again.
    pub fn reset(&mut self, force: bool) -> Result<SetupStatus, HeapError> {
        self.delete(force)?;
        self.setup()
    }

    // ------------------------------------------------------------------
    // Control-field integrity
    // ------------------------------------------------------------------

    /// Additive checksum over the heap control fields, in fixed order, with
    /// the checksum field treated as zero.
    pub fn heap_checksum(&self) -> u32 {
        let mut sum = 0u32;
        for word in [
            self.head as usize,
            self.tail as usize,
            self.end_fence as usize,
            self.base as usize,
            self.pages,
            self.chunks,
        ] {
            for byte in word.to_le_bytes() {
                sum = sum.wrapping_add(byte as u32);
            }
        }
        sum.wrapping_add(self.is_set as u32)
    }

    pub fn stamp_heap(&mut self) {
        self.checksum = self.heap_checksum();
    }

    pub fn heap_checksum_matches(&self) -> bool {
        self.checksum == self.heap_checksum()
    }

    /// Re-stamp the end fence just past the tail chunk's payload.
    ///
    /// # Safety
    /// The tail reference must be current and its payload end must leave
    /// room for the fence inside the committed region.
    pub unsafe fn refresh_end_fence(&mut self) {
        let tail = ChunkRef::new(self.tail);
        let end = tail.payload().add(tail.header().size);
        ptr::write_unaligned(end as *mut u32, END_FENCE);
        self.end_fence = end;
    }

    /// One past the last committed byte.
    pub fn region_end(&self) -> usize {
        self.base as usize + self.pages * PAGE_SIZE
    }

    /// Fold over every chunk in list order. Returns `init` untouched on an
    /// uninitialized heap.
    pub fn fold_chunks<T>(&self, init: T, mut fold: impl FnMut(T, &ChunkHeader) -> T) -> T {
        let mut accumulator = init;
        if !self.is_set {
            return accumulator;
        }
        let mut cursor = ChunkRef::from_raw(self.head);
        while let Some(chunk) = cursor {
            let header = unsafe { chunk.header() };
            accumulator = fold(accumulator, &header);
            cursor = ChunkRef::from_raw(header.next);
        }
        accumulator
    }

    // ------------------------------------------------------------------
    // Split / merge primitives
    // ------------------------------------------------------------------

    /// Carve `chunk` so its payload is exactly `size` bytes, leaving the
    /// remainder as a new free chunk immediately after it.
    ///
    /// `size == chunk.size` is a no-op returning the same chunk. Fails when
    /// `size` exceeds the chunk or the remainder cannot hold a control
    /// block plus at least one byte. If the carved tail lands next to a
    /// free chunk they merge immediately, so two adjacent free chunks never
    /// exist.
    ///
    /// # Safety
    /// `chunk` must be a live chunk of this heap and the lock must be held.
    pub unsafe fn split(&mut self, chunk: ChunkRef, size: usize) -> Option<ChunkRef> {
        let mut header = chunk.header();
        if size == header.size {
            return Some(chunk);
        }
        if size > header.size || header.size - size <= CHUNK_OVERHEAD {
            return None;
        }
        let remainder = header.size - size - CHUNK_OVERHEAD;

        let cut = ChunkRef::new(chunk.payload().add(size));
        cut.store(&ChunkHeader::new_free(remainder, chunk.addr(), header.next));
        cut.stamp();

        match ChunkRef::from_raw(header.next) {
            Some(next) => {
                let mut next_header = next.header();
                next_header.prev = cut.addr();
                next.store(&next_header);
                next.stamp();
            }
            None => self.tail = cut.addr(),
        }

        header.size = size;
        header.next = cut.addr();
        chunk.store(&header);
        chunk.stamp();
        self.chunks += 1;
        trace!(
            "split chunk {:p} into {} + {} payload bytes",
            chunk.addr(),
            size,
            remainder
        );

        let cut_header = cut.header();
        if let Some(next) = ChunkRef::from_raw(cut_header.next) {
            if !next.header().allocated {
                self.merge(cut, next, true);
            }
        }
        self.stamp_heap();
        Some(chunk)
    }

    /// Absorb `b` into `a`, reclaiming the absorbed control block as
    /// payload. Auto-swaps if the arguments are given in reverse adjacency;
    /// fails unless `a.next == b`. In safe mode both chunks must be free;
    /// otherwise only the absorbed chunk must be.
    ///
    /// # Safety
    /// Both must be live chunks of this heap and the lock must be held.
    pub unsafe fn merge(&mut self, a: ChunkRef, b: ChunkRef, safe_mode: bool) -> Option<ChunkRef> {
        let (a, b) = if b.header().next == a.addr() {
            (b, a)
        } else {
            (a, b)
        };
        let mut front = a.header();
        let back = b.header();
        if front.next != b.addr() {
            return None;
        }
        if safe_mode && (front.allocated || back.allocated) {
            return None;
        }
        if !safe_mode && back.allocated {
            return None;
        }

        front.size += back.size + CHUNK_OVERHEAD;
        front.next = back.next;
        a.store(&front);
        a.stamp();

        match ChunkRef::from_raw(front.next) {
            Some(next) => {
                let mut next_header = next.header();
                next_header.prev = a.addr();
                next.store(&next_header);
                next.stamp();
            }
            None => self.tail = a.addr(),
        }
        self.chunks -= 1;
        self.stamp_heap();
        trace!(
            "merged {:p} and {:p} into {} payload bytes",
            a.addr(),
            b.addr(),
            front.size
        );
        Some(a)
    }

    // ------------------------------------------------------------------
    // Growth
    // ------------------------------------------------------------------

    /// Commit enough fresh pages that a retry of `request` is guaranteed to
    /// find either an exact fit or a legal split candidate at the tail.
    ///
    /// A free tail is extended in place; an allocated tail gets a brand-new
    /// free chunk appended over the old end-fence position. Returns false
    /// (heap unchanged) when the grower refuses.
    ///
    /// # Safety
    /// The heap must be set up and the lock must be held.
    pub unsafe fn grow_for(&mut self, request: usize) -> bool {
        let tail = ChunkRef::new(self.tail);
        let tail_header = tail.header();

        let bytes = if tail_header.allocated {
            // The appended chunk's payload will be `bytes - overhead`; keep
            // it out of the unsplittable dead zone (request, request+overhead].
            let want = request + CHUNK_OVERHEAD;
            let mut bytes = align_up(want, PAGE_SIZE);
            if bytes > want && bytes <= want + CHUNK_OVERHEAD {
                bytes += PAGE_SIZE;
            }
            bytes
        } else {
            let want = (request + CHUNK_OVERHEAD + 1).saturating_sub(tail_header.size);
            align_up(want.max(1), PAGE_SIZE)
        };

        if self.grower.extend(bytes as isize).is_none() {
            debug!("growth by {bytes} bytes refused, request for {request} fails");
            return false;
        }
        self.pages += bytes / PAGE_SIZE;

        if tail_header.allocated {
            let fresh = ChunkRef::new(tail.payload().add(tail_header.size));
            fresh.store(&ChunkHeader::new_free(
                bytes - CHUNK_OVERHEAD,
                tail.addr(),
                ptr::null_mut(),
            ));
            fresh.stamp();

            let mut updated = tail.header();
            updated.next = fresh.addr();
            tail.store(&updated);
            tail.stamp();

            self.tail = fresh.addr();
            self.chunks += 1;
        } else {
            let mut updated = tail.header();
            updated.size += bytes;
            tail.store(&updated);
            tail.stamp();
        }
        self.refresh_end_fence();
        self.stamp_heap();
        debug!(
            "grew heap by {} page(s) to {} committed",
            bytes / PAGE_SIZE,
            self.pages
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{LEAD_FENCE, TRAIL_FENCE};
    use crate::grower::SystemGrower;

    fn fresh_core() -> HeapCore {
        let mut core = HeapCore::new(
            HeapConfig::default(),
            Box::new(SystemGrower::with_limit(1024 * 1024)),
        );
        core.setup().expect("setup must succeed");
        core
    }

    // -----------------------------------------------------------------
    // Split and merge are mutual inverses
    // -----------------------------------------------------------------

    #[test]
    fn split_then_merge_reconstructs_the_original_chunk() {
        let mut core = fresh_core();
        let chunk = ChunkRef::new(core.head);
        let original = unsafe { chunk.header() };
        let cut_at = 1000;
        assert!(cut_at + CHUNK_OVERHEAD < original.size);

        unsafe {
            let head = core.split(chunk, cut_at).expect("split must succeed");
            let head_header = head.header();
            assert_eq!(head_header.size, cut_at);

            let tail = ChunkRef::from_raw(head_header.next).expect("split must link a remainder");
            let tail_header = tail.header();
            assert_eq!(
                tail_header.size,
                original.size - cut_at - CHUNK_OVERHEAD,
                "remainder size must account for the carved control block"
            );
            assert_eq!(core.chunks, 2);

            let merged = core.merge(head, tail, true).expect("merge must succeed");
            let merged_header = merged.header();
            assert_eq!(merged_header.size, original.size);
            assert_eq!(merged_header.lead_fence, LEAD_FENCE);
            assert_eq!(merged_header.trail_fence, TRAIL_FENCE);
            assert_eq!(core.chunks, 1);
        }
        assert!(core.validate_inner().is_ok());
    }

    #[test]
    fn split_at_equal_size_is_a_noop() {
        let mut core = fresh_core();
        let chunk = ChunkRef::new(core.head);
        let size = unsafe { chunk.header() }.size;
        let result = unsafe { core.split(chunk, size) };
        assert_eq!(result, Some(chunk));
        assert_eq!(core.chunks, 1);
    }

    #[test]
    fn split_beyond_chunk_size_fails() {
        let mut core = fresh_core();
        let chunk = ChunkRef::new(core.head);
        let size = unsafe { chunk.header() }.size;
        assert!(unsafe { core.split(chunk, size + 1) }.is_none());
        assert!(core.validate_inner().is_ok());
    }

    #[test]
    fn merge_auto_swaps_reversed_arguments() {
        let mut core = fresh_core();
        let chunk = ChunkRef::new(core.head);
        unsafe {
            core.split(chunk, 500).expect("split must succeed");
            let second = ChunkRef::from_raw(chunk.header().next).unwrap();
            let merged = core
                .merge(second, chunk, true)
                .expect("reversed adjacency must auto-swap");
            assert_eq!(merged, chunk);
        }
        assert_eq!(core.chunks, 1);
    }

    #[test]
    fn safe_mode_merge_refuses_allocated_chunks() {
        let mut core = fresh_core();
        let payload = core.malloc_inner(200, Default::default());
        assert!(!payload.is_null());
        unsafe {
            let chunk = ChunkRef::of_payload(payload);
            let free_neighbor = ChunkRef::from_raw(chunk.header().next).unwrap();
            assert!(core.merge(chunk, free_neighbor, true).is_none());
            assert!(core.merge(chunk, free_neighbor, false).is_some());
        }
    }
}
