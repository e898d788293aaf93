//! Pointer classification: the sole gate for `free` validity and the basis
//! of every "is this a real block" query.

use core::ptr;

use crate::chunk::{ChunkHeader, ChunkRef, CHUNK_OVERHEAD, END_FENCE_BYTES};
use crate::heap::HeapCore;

/// Where an arbitrary address falls relative to the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerType {
    /// The null pointer.
    Null,
    /// Before the managed region, at or past its end, or no heap is set up.
    OutOfHeap,
    /// Within the trailing end-of-heap fence.
    EndFence,
    /// Inside some chunk's control block.
    ControlBlock,
    /// Inside an unallocated chunk's payload.
    Unallocated,
    /// Exactly at an allocated chunk's payload start.
    Valid,
    /// Strictly inside an allocated chunk's payload.
    ValidInterior,
}

impl HeapCore {
    /// Classify `pointer`: bounds check against the whole region, then
    /// linear containment over the chunk list.
    pub(crate) fn classify(&self, pointer: *const u8) -> PointerType {
        if pointer.is_null() {
            return PointerType::Null;
        }
        if !self.is_set {
            return PointerType::OutOfHeap;
        }
        let address = pointer as usize;
        if address < self.base as usize || address >= self.region_end() {
            return PointerType::OutOfHeap;
        }
        let fence = self.end_fence as usize;
        if address >= fence && address < fence + END_FENCE_BYTES {
            return PointerType::EndFence;
        }

        let mut cursor = ChunkRef::from_raw(self.head);
        while let Some(chunk) = cursor {
            let header = unsafe { chunk.header() };
            let start = chunk.addr() as usize;
            let payload = start + CHUNK_OVERHEAD;
            if address >= start && address < payload + header.size {
                if address < payload {
                    return PointerType::ControlBlock;
                }
                if !header.allocated {
                    return PointerType::Unallocated;
                }
                if address == payload {
                    return PointerType::Valid;
                }
                return PointerType::ValidInterior;
            }
            cursor = ChunkRef::from_raw(header.next);
        }
        PointerType::OutOfHeap
    }

    /// The allocated chunk whose payload span contains `pointer`, if any.
    fn owning_allocated(&self, pointer: *const u8) -> Option<(ChunkRef, ChunkHeader)> {
        match self.classify(pointer) {
            PointerType::Valid | PointerType::ValidInterior => {}
            _ => return None,
        }
        let address = pointer as usize;
        let mut cursor = ChunkRef::from_raw(self.head);
        while let Some(chunk) = cursor {
            let header = unsafe { chunk.header() };
            let payload = chunk.addr() as usize + CHUNK_OVERHEAD;
            if address >= payload && address < payload + header.size {
                return Some((chunk, header));
            }
            cursor = ChunkRef::from_raw(header.next);
        }
        None
    }

    /// Payload size of the allocated block containing `pointer`, 0 for
    /// anything that is not inside an allocated payload.
    pub(crate) fn block_size_inner(&self, pointer: *const u8) -> usize {
        self.owning_allocated(pointer)
            .map_or(0, |(_, header)| header.size)
    }

    /// Payload start of the allocated block containing `pointer`, null for
    /// anything that is not inside an allocated payload.
    pub(crate) fn data_block_start_inner(&self, pointer: *const u8) -> *mut u8 {
        self.owning_allocated(pointer)
            .map_or(ptr::null_mut(), |(chunk, _)| chunk.payload())
    }
}
