//! fenceheap — a fence-and-checksum guarded chunk heap.
//!
//! A user-space dynamic memory manager with malloc-family semantics over a
//! single contiguous region obtained from an "extend address space"
//! primitive. Every region of the heap is tracked by an intrusive chunk
//! list embedded in the managed bytes; allocation is a linear best-fit
//! scan with split/merge, deallocation coalesces eagerly, and a corruption
//! guard of boundary fences plus additive checksums backs an explicit
//! [`Heap::validate`] battery.
//!
//! ```no_run
//! use fenceheap::Heap;
//!
//! let heap = Heap::new();
//! heap.setup().expect("address space available");
//! let p = heap.malloc(400);
//! assert!(!p.is_null());
//! assert_eq!(heap.get_block_size(p), 400);
//! heap.free(p);
//! assert!(heap.validate().is_ok());
//! ```

mod aligned;
mod alloc;
mod chunk;
mod heap;
mod stats;

pub mod api;
pub mod classify;
pub mod config;
pub mod grower;
pub mod util;
pub mod validate;

pub use api::{Heap, HeapError, SetupStatus};
pub use chunk::{CHUNK_OVERHEAD, END_FENCE_BYTES};
pub use classify::PointerType;
pub use config::HeapConfig;
pub use grower::{AddressSpaceGrower, SystemGrower, DEFAULT_LIMIT_BYTES};
pub use util::PAGE_SIZE;
pub use validate::HeapCorruption;
