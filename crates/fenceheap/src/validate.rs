//! Heap-wide consistency validation: an ordered, short-circuiting battery
//! over the control fields, the end fence, and every chunk in list order.

use core::ptr;

use thiserror::Error;

use crate::chunk::{checksum_matches, ChunkRef, CHUNK_OVERHEAD, END_FENCE, LEAD_FENCE, TRAIL_FENCE};
use crate::heap::HeapCore;

/// The specific first failure found by [`crate::Heap::validate`].
///
/// Corruption is diagnostic-only: detecting it never aborts anything, and
/// severity is the caller's decision.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapCorruption {
    #[error("heap control checksum mismatch")]
    HeapChecksum,
    #[error("head chunk reference is null")]
    NullHead,
    #[error("tail chunk reference is null")]
    NullTail,
    #[error("head chunk does not sit at the heap base")]
    HeadNotAtBase,
    #[error("end-of-heap fence overwritten")]
    EndFence,
    #[error("leading fence overwritten at chunk {index}")]
    LeadFence { index: usize },
    #[error("trailing fence overwritten at chunk {index}")]
    TrailFence { index: usize },
    #[error("checksum mismatch at chunk {index}")]
    ChunkChecksum { index: usize },
    #[error("chunk {index} is not contiguous with its successor")]
    Discontiguous { index: usize },
    #[error("broken back-reference at chunk {index}")]
    BackReference { index: usize },
    #[error("recorded tail does not match the last chunk")]
    TailMismatch,
}

impl HeapCore {
    /// Run the validation battery and return the first failure.
    ///
    /// Order: heap checksum, head/tail references, head-at-base, end
    /// fence; then per chunk: leading fence, trailing fence, checksum,
    /// forward contiguity, back-reference; finally the recorded tail.
    /// A heap that was never set up has nothing to corrupt.
    pub(crate) fn validate_inner(&self) -> Result<(), HeapCorruption> {
        if !self.is_set {
            return Ok(());
        }
        if !self.heap_checksum_matches() {
            return Err(HeapCorruption::HeapChecksum);
        }
        if self.head.is_null() {
            return Err(HeapCorruption::NullHead);
        }
        if self.tail.is_null() {
            return Err(HeapCorruption::NullTail);
        }
        if self.head != self.base {
            return Err(HeapCorruption::HeadNotAtBase);
        }
        unsafe {
            if ptr::read_unaligned(self.end_fence as *const u32) != END_FENCE {
                return Err(HeapCorruption::EndFence);
            }

            let mut index = 0;
            let mut chunk = ChunkRef::new(self.head);
            loop {
                let header = chunk.header();
                if header.lead_fence != LEAD_FENCE {
                    return Err(HeapCorruption::LeadFence { index });
                }
                if header.trail_fence != TRAIL_FENCE {
                    return Err(HeapCorruption::TrailFence { index });
                }
                if !checksum_matches(&header) {
                    return Err(HeapCorruption::ChunkChecksum { index });
                }
                if index == 0 && !header.prev.is_null() {
                    return Err(HeapCorruption::BackReference { index });
                }
                match ChunkRef::from_raw(header.next) {
                    Some(next) => {
                        let expected = chunk.addr() as usize + CHUNK_OVERHEAD + header.size;
                        if next.addr() as usize != expected {
                            return Err(HeapCorruption::Discontiguous { index });
                        }
                        if next.header().prev != chunk.addr() {
                            return Err(HeapCorruption::BackReference { index: index + 1 });
                        }
                        chunk = next;
                        index += 1;
                    }
                    None => break,
                }
            }
            if chunk.addr() != self.tail {
                return Err(HeapCorruption::TailMismatch);
            }
        }
        Ok(())
    }
}
