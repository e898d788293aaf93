//! Allocation-engine tests: classification of returned pointers, byte-total
//! round trips, growth, realloc geometry, and the degradation paths.

use fenceheap::{Heap, HeapConfig, PointerType, SystemGrower, PAGE_SIZE};

fn small_heap() -> Heap {
    let heap = Heap::with_grower(
        HeapConfig::default(),
        Box::new(SystemGrower::with_limit(1024 * 1024)),
    );
    heap.setup().unwrap();
    heap
}

// ---------------------------------------------------------------------------
// Successful allocations classify as valid payload starts
// ---------------------------------------------------------------------------

#[test]
fn malloc_returns_a_valid_payload_start_of_exact_size() {
    let heap = small_heap();
    for &size in &[1usize, 7, 16, 100, 400, 1000] {
        let p = heap.malloc(size);
        assert!(!p.is_null(), "malloc({size}) returned null");
        assert_eq!(heap.get_pointer_type(p), PointerType::Valid);
        assert_eq!(heap.get_block_size(p), size);
        assert_eq!(heap.get_data_block_start(p), p);
        heap.free(p);
    }
}

#[test]
fn interior_pointers_classify_and_resolve_to_their_block() {
    let heap = small_heap();
    let p = heap.malloc(100);
    assert!(!p.is_null());
    let interior = unsafe { p.add(40) };
    assert_eq!(heap.get_pointer_type(interior), PointerType::ValidInterior);
    assert_eq!(heap.get_data_block_start(interior), p);
    assert_eq!(heap.get_block_size(interior), 100);
    heap.free(p);
}

#[test]
fn classification_covers_the_whole_region() {
    let heap = small_heap();
    let p = heap.malloc(64);
    assert!(!p.is_null());

    assert_eq!(heap.get_pointer_type(core::ptr::null()), PointerType::Null);
    let control = p.wrapping_sub(1);
    assert_eq!(heap.get_pointer_type(control), PointerType::ControlBlock);
    let outside = p.wrapping_sub(fenceheap::CHUNK_OVERHEAD + 1);
    // One byte before the head chunk's control block is before the base.
    assert_eq!(heap.get_pointer_type(outside), PointerType::OutOfHeap);

    heap.free(p);
    assert_eq!(heap.get_pointer_type(p), PointerType::Unallocated);
}

// ---------------------------------------------------------------------------
// malloc/free round trip restores the byte totals exactly
// ---------------------------------------------------------------------------

#[test]
fn malloc_then_free_restores_byte_totals() {
    let heap = small_heap();
    let used_before = heap.used_space();
    let free_before = heap.free_space();

    let p = heap.malloc(400);
    assert!(!p.is_null());
    assert_eq!(heap.used_space(), used_before + 400);

    heap.free(p);
    assert_eq!(heap.used_space(), used_before);
    assert_eq!(heap.free_space(), free_before);
    assert_eq!(heap.free_gaps_count(), 1);
    assert!(heap.validate().is_ok());
}

// ---------------------------------------------------------------------------
// Growth
// ---------------------------------------------------------------------------

#[test]
fn oversized_request_grows_to_a_second_page() {
    let heap = small_heap();
    assert_eq!(heap.committed_pages(), 1);

    let p = heap.malloc(PAGE_SIZE + 100);
    assert!(!p.is_null(), "growth must satisfy the retry");
    assert_eq!(heap.committed_pages(), 2);
    assert_eq!(heap.used_blocks_count(), 1);
    assert_eq!(heap.get_block_size(p), PAGE_SIZE + 100);
    assert!(heap.validate().is_ok());
}

#[test]
fn growth_appends_a_chunk_when_the_tail_is_allocated() {
    let heap = small_heap();
    // Occupy the whole first region so the tail chunk is allocated.
    let fill = heap.malloc(heap.free_space());
    assert!(!fill.is_null());
    assert_eq!(heap.free_gaps_count(), 0);

    let p = heap.malloc(600);
    assert!(!p.is_null(), "growth must append a fresh free chunk");
    assert_eq!(heap.get_block_size(p), 600);
    assert!(heap.committed_pages() >= 2);
    assert!(heap.validate().is_ok());
}

#[test]
fn exhausted_grower_leaves_the_heap_unchanged() {
    let heap = small_heap();
    let used_before = heap.used_space();
    let free_before = heap.free_space();

    let p = heap.malloc(100 * 1024 * 1024);
    assert!(p.is_null(), "100 MB cannot fit under a 1 MiB cap");
    assert_eq!(heap.used_space(), used_before);
    assert_eq!(heap.free_space(), free_before);
    assert_eq!(heap.committed_pages(), 1);
    assert!(heap.validate().is_ok());
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

#[test]
fn calloc_zero_fills_the_payload() {
    let heap = small_heap();
    let p = heap.calloc(4, 100);
    assert!(!p.is_null());
    assert_eq!(heap.get_block_size(p), 400);
    let bytes = unsafe { core::slice::from_raw_parts(p, 400) };
    assert!(bytes.iter().all(|&b| b == 0), "calloc payload must be zeroed");
    heap.free(p);
}

#[test]
fn calloc_overflow_fails_fast() {
    let heap = small_heap();
    let p = heap.calloc(usize::MAX / 2 + 1, 2);
    assert!(p.is_null(), "overflowing count * size must fail");
    assert_eq!(heap.used_blocks_count(), 0);
}

// ---------------------------------------------------------------------------
// realloc geometry
// ---------------------------------------------------------------------------

#[test]
fn realloc_grows_in_place_into_a_following_free_gap() {
    let heap = small_heap();
    let p = heap.malloc(250);
    assert!(!p.is_null());
    assert_eq!(heap.used_blocks_count(), 1);
    assert_eq!(heap.free_gaps_count(), 1);

    unsafe { core::ptr::write_bytes(p, 0x5A, 250) };
    let q = heap.realloc(p, 500);
    assert_eq!(q, p, "growth into the free neighbor must keep the address");
    assert_eq!(heap.get_block_size(q), 500);
    assert_eq!(heap.used_blocks_count(), 1);
    assert_eq!(heap.free_gaps_count(), 1);

    let bytes = unsafe { core::slice::from_raw_parts(q, 250) };
    assert!(bytes.iter().all(|&b| b == 0x5A));
    assert!(heap.validate().is_ok());
}

#[test]
fn realloc_shrinks_in_place_leaving_a_free_remainder() {
    let heap = small_heap();
    let p = heap.malloc(200);
    assert!(!p.is_null());
    unsafe { core::ptr::write_bytes(p, 0xA7, 200) };

    let q = heap.realloc(p, 100);
    assert_eq!(q, p, "shrinking must keep the address");
    assert_eq!(heap.get_block_size(q), 100);
    assert_eq!(heap.used_blocks_count(), 1);
    assert_eq!(
        heap.free_gaps_count(),
        1,
        "the remainder must coalesce with the free tail"
    );
    let bytes = unsafe { core::slice::from_raw_parts(q, 100) };
    assert!(bytes.iter().all(|&b| b == 0xA7));
    assert!(heap.validate().is_ok());
}

#[test]
fn realloc_moves_when_the_right_neighbor_is_allocated() {
    let heap = small_heap();
    let p = heap.malloc(100);
    let barrier = heap.malloc(100);
    assert!(!p.is_null() && !barrier.is_null());
    unsafe { core::ptr::write_bytes(p, 0xC3, 100) };

    let q = heap.realloc(p, 2000);
    assert!(!q.is_null());
    assert_ne!(q, p, "a blocked growth must move the allocation");
    assert_eq!(heap.get_block_size(q), 2000);
    assert_eq!(
        heap.get_pointer_type(p),
        PointerType::Unallocated,
        "the old block must have been freed"
    );
    let bytes = unsafe { core::slice::from_raw_parts(q, 100) };
    assert!(bytes.iter().all(|&b| b == 0xC3), "payload must be copied");

    heap.free(q);
    heap.free(barrier);
    assert!(heap.validate().is_ok());
}

#[test]
fn realloc_same_size_is_a_noop() {
    let heap = small_heap();
    let p = heap.malloc(128);
    let q = heap.realloc(p, 128);
    assert_eq!(q, p);
    assert_eq!(heap.used_blocks_count(), 1);
}

#[test]
fn realloc_null_acts_as_malloc() {
    let heap = small_heap();
    let p = heap.realloc(core::ptr::null_mut(), 64);
    assert!(!p.is_null());
    assert_eq!(heap.get_pointer_type(p), PointerType::Valid);
    heap.free(p);
}

#[test]
fn realloc_to_zero_frees_and_returns_null() {
    let heap = small_heap();
    let p = heap.malloc(64);
    assert!(!p.is_null());
    let q = heap.realloc(p, 0);
    assert!(q.is_null());
    assert_eq!(heap.used_blocks_count(), 0);
}

#[test]
fn failed_realloc_leaves_the_original_untouched() {
    let heap = small_heap();
    let p = heap.malloc(100);
    assert!(!p.is_null());
    unsafe { core::ptr::write_bytes(p, 0x11, 100) };

    let q = heap.realloc(p, 100 * 1024 * 1024);
    assert!(q.is_null());
    assert_eq!(heap.get_block_size(p), 100);
    let bytes = unsafe { core::slice::from_raw_parts(p, 100) };
    assert!(bytes.iter().all(|&b| b == 0x11));
}

#[test]
fn realloc_of_an_invalid_pointer_returns_null() {
    let heap = small_heap();
    let mut local = 0u8;
    let q = heap.realloc(&mut local as *mut u8, 64);
    assert!(q.is_null());
    assert_eq!(heap.used_blocks_count(), 0);
}

// ---------------------------------------------------------------------------
// free degrades to a no-op on anything but a valid payload start
// ---------------------------------------------------------------------------

#[test]
fn free_of_invalid_pointers_is_a_noop() {
    let heap = small_heap();
    let p = heap.malloc(100);
    assert!(!p.is_null());
    let used = heap.used_space();

    heap.free(core::ptr::null_mut());
    let mut local = 0u8;
    heap.free(&mut local as *mut u8);
    heap.free(unsafe { p.add(10) }); // interior, not the start
    heap.free(p.wrapping_sub(1)); // control block

    assert_eq!(heap.used_space(), used, "no-op frees must not change totals");
    assert_eq!(heap.get_block_size(p), 100);
    assert!(heap.validate().is_ok());
}

#[test]
fn double_free_is_a_noop() {
    let heap = small_heap();
    let p = heap.malloc(100);
    heap.free(p);
    let free_after_first = heap.free_space();
    heap.free(p); // now classifies as unallocated
    assert_eq!(heap.free_space(), free_after_first);
    assert!(heap.validate().is_ok());
}

#[test]
fn malloc_zero_returns_null() {
    let heap = small_heap();
    assert!(heap.malloc(0).is_null());
}

// ---------------------------------------------------------------------------
// Debug variants record provenance without changing semantics
// ---------------------------------------------------------------------------

#[test]
fn debug_variants_behave_like_their_plain_counterparts() {
    let heap = small_heap();
    let p = heap.malloc_debug(100, file!(), line!());
    assert!(!p.is_null());
    assert_eq!(heap.get_block_size(p), 100);

    let q = heap.realloc_debug(p, 200, file!(), line!());
    assert_eq!(q, p);
    assert_eq!(heap.get_block_size(q), 200);

    let c = heap.calloc_debug(2, 50, file!(), line!());
    assert!(!c.is_null());
    let bytes = unsafe { core::slice::from_raw_parts(c, 100) };
    assert!(bytes.iter().all(|&b| b == 0));

    heap.free(q);
    heap.free(c);
    assert!(heap.validate().is_ok());
}
