//! The public heap handle.
//!
//! A [`Heap`] is an explicit context object owning its managed region, its
//! grower, and its lock. Multiple independent instances can coexist, which
//! keeps tests isolated. Every mutator takes the write lock; statistics,
//! validation, and classification take the read lock, so traversals never
//! race a mutation.

use parking_lot::RwLock;
use thiserror::Error;

use crate::chunk::CallSite;
use crate::classify::PointerType;
use crate::config::HeapConfig;
use crate::grower::{AddressSpaceGrower, SystemGrower};
use crate::heap::HeapCore;
use crate::validate::HeapCorruption;

/// What [`Heap::setup`] found to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    /// The region was acquired and the first free chunk installed.
    Initialized,
    /// The heap was already set up; nothing changed.
    AlreadyInitialized,
}

/// Failures surfaced by the lifecycle operations.
///
/// Allocation failures never take this form: `malloc` and friends degrade
/// to a null return and `free` to a no-op, so no operation on the core
/// surface can abort the process.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    #[error("address space exhausted")]
    AddressSpaceExhausted,
    #[error("heap corruption detected: {0}")]
    Corrupted(#[from] HeapCorruption),
    #[error("{0} live allocation(s) remain; pass force to tear down anyway")]
    LiveAllocations(usize),
}

/// A user-space heap with malloc-family semantics over one contiguous
/// region obtained from an [`AddressSpaceGrower`].
///
/// Allocation methods hand out raw payload pointers and return null on
/// failure. Reading or writing through those pointers is the caller's
/// `unsafe`; out-of-bounds writes are what the fences and checksums exist
/// to catch, via [`Heap::validate`].
pub struct Heap {
    core: RwLock<HeapCore>,
}

impl Heap {
    /// A heap configured from the environment, backed by the default
    /// system grower.
    pub fn new() -> Self {
        Self::with_config(HeapConfig::from_env())
    }

    /// A heap with an explicit configuration, backed by a [`SystemGrower`]
    /// capped at `config.limit_bytes`.
    pub fn with_config(config: HeapConfig) -> Self {
        let grower = Box::new(SystemGrower::with_limit(config.limit_bytes));
        Self::with_grower(config, grower)
    }

    /// A heap over a caller-supplied grower.
    pub fn with_grower(config: HeapConfig, grower: Box<dyn AddressSpaceGrower + Send>) -> Self {
        Heap {
            core: RwLock::new(HeapCore::new(config, grower)),
        }
    }

    // ==================================================================
    // Lifecycle
    // ==================================================================

    /// Acquire the initial pages and install one region-spanning free
    /// chunk. Calling it on a live heap reports `AlreadyInitialized`.
    pub fn setup(&self) -> Result<SetupStatus, HeapError> {
        self.core.write().setup()
    }

    /// Release all committed pages. Refuses while corrupted; without
    /// `force`, also refuses while live allocations remain.
    pub fn delete(&self, force: bool) -> Result<(), HeapError> {
        self.core.write().delete(force)
    }

    /// [`Heap::delete`] followed by [`Heap::setup`].
    pub fn reset(&self, force: bool) -> Result<SetupStatus, HeapError> {
        self.core.write().reset(force)
    }

    // ==================================================================
    // Allocation
    // ==================================================================

    /// Allocate `size` payload bytes. Null on failure.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        self.core.write().malloc_inner(size, CallSite::default())
    }

    /// [`Heap::malloc`] with call-site provenance recorded in the chunk.
    pub fn malloc_debug(&self, size: usize, file: &'static str, line: u32) -> *mut u8 {
        let site = CallSite {
            file: Some(file),
            line,
        };
        self.core.write().malloc_inner(size, site)
    }

    /// Allocate `count * size` zero-filled bytes. Null on failure or when
    /// the multiplication overflows.
    pub fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        self.core
            .write()
            .calloc_inner(count, size, CallSite::default())
    }

    /// [`Heap::calloc`] with call-site provenance recorded in the chunk.
    pub fn calloc_debug(&self, count: usize, size: usize, file: &'static str, line: u32) -> *mut u8 {
        let site = CallSite {
            file: Some(file),
            line,
        };
        self.core.write().calloc_inner(count, size, site)
    }

    /// Resize an allocation, in place where the chunk geometry allows.
    /// Null `pointer` allocates; zero `size` frees and returns null; on
    /// failure the original allocation is left untouched and null returns.
    pub fn realloc(&self, pointer: *mut u8, size: usize) -> *mut u8 {
        self.core
            .write()
            .realloc_inner(pointer, size, CallSite::default(), false)
    }

    /// [`Heap::realloc`] with call-site provenance recorded in the chunk.
    pub fn realloc_debug(
        &self,
        pointer: *mut u8,
        size: usize,
        file: &'static str,
        line: u32,
    ) -> *mut u8 {
        let site = CallSite {
            file: Some(file),
            line,
        };
        self.core.write().realloc_inner(pointer, size, site, false)
    }

    /// Free an allocation and coalesce with free neighbors. A pointer that
    /// is not a valid payload start is silently ignored.
    pub fn free(&self, pointer: *mut u8) {
        self.core.write().free_inner(pointer);
    }

    // ==================================================================
    // Page-aligned allocation
    // ==================================================================

    /// Allocate `size` bytes starting on a page boundary. Requires at
    /// least two committed pages; never grows the region. Null on failure.
    pub fn malloc_aligned(&self, size: usize) -> *mut u8 {
        self.core
            .write()
            .malloc_aligned_inner(size, CallSite::default())
    }

    /// [`Heap::malloc_aligned`] with call-site provenance.
    pub fn malloc_aligned_debug(&self, size: usize, file: &'static str, line: u32) -> *mut u8 {
        let site = CallSite {
            file: Some(file),
            line,
        };
        self.core.write().malloc_aligned_inner(size, site)
    }

    /// Page-aligned [`Heap::calloc`].
    pub fn calloc_aligned(&self, count: usize, size: usize) -> *mut u8 {
        self.core
            .write()
            .calloc_aligned_inner(count, size, CallSite::default())
    }

    /// [`Heap::calloc_aligned`] with call-site provenance.
    pub fn calloc_aligned_debug(
        &self,
        count: usize,
        size: usize,
        file: &'static str,
        line: u32,
    ) -> *mut u8 {
        let site = CallSite {
            file: Some(file),
            line,
        };
        self.core.write().calloc_aligned_inner(count, size, site)
    }

    /// Alignment-preserving [`Heap::realloc`]: the in-place paths keep the
    /// payload address and the move fallback allocates page-aligned.
    pub fn realloc_aligned(&self, pointer: *mut u8, size: usize) -> *mut u8 {
        self.core
            .write()
            .realloc_inner(pointer, size, CallSite::default(), true)
    }

    /// [`Heap::realloc_aligned`] with call-site provenance.
    pub fn realloc_aligned_debug(
        &self,
        pointer: *mut u8,
        size: usize,
        file: &'static str,
        line: u32,
    ) -> *mut u8 {
        let site = CallSite {
            file: Some(file),
            line,
        };
        self.core.write().realloc_inner(pointer, size, site, true)
    }

    // ==================================================================
    // Inspection
    // ==================================================================

    /// Classify an arbitrary address relative to the heap.
    pub fn get_pointer_type(&self, pointer: *const u8) -> PointerType {
        self.core.read().classify(pointer)
    }

    /// Run the consistency battery and report the first failure.
    pub fn validate(&self) -> Result<(), HeapCorruption> {
        self.core.read().validate_inner()
    }

    /// Payload size of the allocated block containing `pointer`, 0 otherwise.
    pub fn get_block_size(&self, pointer: *const u8) -> usize {
        self.core.read().block_size_inner(pointer)
    }

    /// Payload start of the allocated block containing `pointer`, null otherwise.
    pub fn get_data_block_start(&self, pointer: *const u8) -> *mut u8 {
        self.core.read().data_block_start_inner(pointer)
    }

    // ==================================================================
    // Statistics
    // ==================================================================

    /// Total payload bytes currently allocated.
    pub fn used_space(&self) -> usize {
        self.core.read().used_space()
    }

    /// Total payload bytes currently free.
    pub fn free_space(&self) -> usize {
        self.core.read().free_space()
    }

    /// Largest single allocated payload.
    pub fn largest_used_block(&self) -> usize {
        self.core.read().largest_used_block()
    }

    /// Largest single free span.
    pub fn largest_free_gap(&self) -> usize {
        self.core.read().largest_free_gap()
    }

    /// Number of allocated blocks.
    pub fn used_blocks_count(&self) -> usize {
        self.core.read().used_blocks_count()
    }

    /// Number of free regions able to hold at least a pointer-sized payload.
    pub fn free_gaps_count(&self) -> usize {
        self.core.read().free_gaps_count()
    }

    /// Pages currently committed to the managed region.
    pub fn committed_pages(&self) -> usize {
        self.core.read().pages
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
