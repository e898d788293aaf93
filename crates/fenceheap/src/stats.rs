//! Read-only traversal statistics. None of these mutate the heap; the
//! public surface takes the shared lock around each query.

use core::mem;

use crate::heap::HeapCore;

/// Smallest free span worth reporting as a gap: it must be able to hold at
/// least a pointer-sized payload.
const MIN_GAP_BYTES: usize = mem::size_of::<*mut u8>();

impl HeapCore {
    /// Total payload bytes currently allocated.
    pub(crate) fn used_space(&self) -> usize {
        self.fold_chunks(0, |sum, h| if h.allocated { sum + h.size } else { sum })
    }

    /// Total payload bytes currently free.
    pub(crate) fn free_space(&self) -> usize {
        self.fold_chunks(0, |sum, h| if h.allocated { sum } else { sum + h.size })
    }

    /// Largest single allocated payload, 0 when nothing is allocated.
    pub(crate) fn largest_used_block(&self) -> usize {
        self.fold_chunks(0, |max, h| if h.allocated { max.max(h.size) } else { max })
    }

    /// Largest single free span, 0 when nothing is free.
    pub(crate) fn largest_free_gap(&self) -> usize {
        self.fold_chunks(0, |max, h| if h.allocated { max } else { max.max(h.size) })
    }

    /// Number of allocated blocks.
    pub(crate) fn used_blocks_count(&self) -> usize {
        self.fold_chunks(0, |count, h| count + h.allocated as usize)
    }

    /// Number of free regions able to hold at least a pointer-sized payload.
    pub(crate) fn free_gaps_count(&self) -> usize {
        self.fold_chunks(0, |count, h| {
            count + (!h.allocated && h.size >= MIN_GAP_BYTES) as usize
        })
    }
}
