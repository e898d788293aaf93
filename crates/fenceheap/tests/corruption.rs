//! Corruption detection through the public surface: an overflowing write
//! through a returned pointer must be caught by the validation battery.

use fenceheap::{Heap, HeapConfig, HeapCorruption, HeapError, SystemGrower};

fn small_heap() -> Heap {
    let heap = Heap::with_grower(
        HeapConfig::default(),
        Box::new(SystemGrower::with_limit(1024 * 1024)),
    );
    heap.setup().unwrap();
    heap
}

// ---------------------------------------------------------------------------
// Validation is quiet on a healthy heap, loud after an overflow
// ---------------------------------------------------------------------------

#[test]
fn validate_is_clean_across_ordinary_traffic() {
    let heap = small_heap();
    let a = heap.malloc(100);
    let b = heap.calloc(3, 64);
    assert!(heap.validate().is_ok());
    let a = heap.realloc(a, 300);
    assert!(heap.validate().is_ok());
    heap.free(b);
    heap.free(a);
    assert!(heap.validate().is_ok());
}

#[test]
fn overflow_past_the_payload_smashes_the_next_leading_fence() {
    let heap = small_heap();
    let p = heap.malloc(100);
    assert!(!p.is_null());
    assert!(heap.validate().is_ok());

    // Write past the payload end, straight into the next chunk's control
    // block. The chunk after the allocation has index 1.
    unsafe { core::ptr::write_bytes(p.add(100), 0xEE, 4) };
    assert_eq!(
        heap.validate(),
        Err(HeapCorruption::LeadFence { index: 1 })
    );
}

// ---------------------------------------------------------------------------
// Corruption is diagnostic-only, but teardown refuses it
// ---------------------------------------------------------------------------

#[test]
fn corrupted_heap_refuses_teardown_even_with_force() {
    let heap = small_heap();
    let p = heap.malloc(100);
    assert!(!p.is_null());
    unsafe { core::ptr::write_bytes(p.add(100), 0xEE, 4) };

    let fault = heap.validate().expect_err("heap must report corruption");
    assert_eq!(heap.delete(true), Err(HeapError::Corrupted(fault)));
}
