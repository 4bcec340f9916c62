//! Value semantics of device arrays on the host backend.
//! Run with: cargo test -p kiln-core

use std::sync::Arc;

use kiln_core::{DeviceArray, HostBackend, KilnError};

fn device() -> Arc<HostBackend> {
    Arc::new(HostBackend::new(0))
}

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn test_roundtrip_through_host() {
    let dev = device();
    let inputs: [&[i32]; 4] = [&[], &[7], &[1, 2, 3, 4], &[i32::MIN, -1, 0, 1, i32::MAX]];
    for input in inputs {
        let a = DeviceArray::from_host(&dev, input).unwrap();
        let b = DeviceArray::from_host(&dev, &a.copy_to_host().unwrap()).unwrap();
        assert_eq!(b.copy_to_host().unwrap(), input);
    }
}

#[test]
fn test_roundtrip_of_slice() {
    let dev = device();
    let a = DeviceArray::from_host(&dev, &[1.0f64, 2.0, 3.0, 4.0, 5.0]).unwrap();
    let s = a.slice(1..4).unwrap();
    let back = DeviceArray::from_host(&dev, &s.copy_to_host().unwrap()).unwrap();
    assert_eq!(back.copy_to_host().unwrap(), vec![2.0, 3.0, 4.0]);
}

// ============================================================================
// Slice isolation
// ============================================================================

#[test]
fn test_mutating_slice_leaves_parent_unchanged() {
    let dev = device();
    let a = DeviceArray::from_host(&dev, &[0i32, 1, 2, 3, 4, 5]).unwrap();
    let mut s = a.slice(2..4).unwrap();
    assert!(s.shares_storage_with(&a));

    s.set(0, 200).unwrap();

    assert!(!s.shares_storage_with(&a));
    assert_eq!(s.copy_to_host().unwrap(), vec![200, 3]);
    assert_eq!(a.copy_to_host().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_mutating_parent_leaves_earlier_slices_unchanged() {
    let dev = device();
    let mut a = DeviceArray::from_host(&dev, &[0i32, 1, 2, 3]).unwrap();
    let before = a.slice(1..3).unwrap();
    a.set(1, 100).unwrap();
    a.set(0, -5).unwrap();
    assert_eq!(before.copy_to_host().unwrap(), vec![1, 2]);
    assert_eq!(a.copy_to_host().unwrap(), vec![-5, 100, 2, 3]);
}

#[test]
fn test_sibling_slices_are_isolated() {
    let dev = device();
    let a = DeviceArray::from_host(&dev, &[0u64; 4]).unwrap();
    let mut left = a.slice(..2).unwrap();
    let right = a.slice(1..).unwrap();
    left.set(1, 9).unwrap();
    assert_eq!(right.copy_to_host().unwrap(), vec![0, 0, 0]);
    assert_eq!(left.copy_to_host().unwrap(), vec![0, 9]);
}

// ============================================================================
// Copy-on-write
// ============================================================================

#[test]
fn test_value_copy_then_mutate_copy() {
    let dev = device();
    let a = DeviceArray::from_host(&dev, &[1i32, 2, 3]).unwrap();
    let mut b = a.clone();
    assert!(b.shares_storage_with(&a));
    b.set(0, 10).unwrap();
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3]);
    assert_eq!(b.copy_to_host().unwrap(), vec![10, 2, 3]);
}

#[test]
fn test_value_copy_then_mutate_original() {
    let dev = device();
    let mut a = DeviceArray::from_host(&dev, &[1i32, 2, 3]).unwrap();
    let b = a.clone();
    a.replace_range(.., &[4, 5, 6]).unwrap();
    assert_eq!(a.copy_to_host().unwrap(), vec![4, 5, 6]);
    assert_eq!(b.copy_to_host().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_unique_array_mutates_in_place() {
    let dev = device();
    let mut a = DeviceArray::from_host(&dev, &[1i32, 2, 3]).unwrap();
    assert!(a.is_unique());
    let allocations = dev.live_allocations();
    a.set(2, 30).unwrap();
    a.set(0, 10).unwrap();
    assert_eq!(dev.live_allocations(), allocations);
}

#[test]
fn test_copy_happens_once_per_detach() {
    let dev = device();
    let a = DeviceArray::from_host(&dev, &[0i32; 8]).unwrap();
    let mut b = a.clone();
    b.set(0, 1).unwrap();
    let after_first = dev.live_allocations();
    b.set(1, 2).unwrap();
    b.set(2, 3).unwrap();
    assert_eq!(dev.live_allocations(), after_first);
    assert_eq!(after_first, 2);
}

// ============================================================================
// Bounds
// ============================================================================

#[test]
fn test_indexing_out_of_bounds() {
    let dev = device();
    let mut a = DeviceArray::from_host(&dev, &[1i32, 2, 3, 4]).unwrap();
    for i in [4usize, 5, 100, usize::MAX] {
        assert!(matches!(a.get(i), Err(KilnError::IndexOutOfBounds { .. })), "get({i})");
        assert!(a.set(i, 0).unwrap_err().is_bounds(), "set({i})");
        assert!(a.get_mut(i).is_err(), "get_mut({i})");
    }
    let s = a.slice(1..3).unwrap();
    assert!(s.get(2).unwrap_err().is_bounds());
    assert_eq!(s.get(1).unwrap().read().unwrap(), 3);
}

#[test]
fn test_ranges_out_of_bounds() {
    let dev = device();
    let mut a = DeviceArray::from_host(&dev, &[1i32, 2, 3, 4]).unwrap();
    assert!(a.slice(3..5).unwrap_err().is_bounds());
    assert!(a.replace_range(5.., &[1]).unwrap_err().is_bounds());
    let other = DeviceArray::from_host(&dev, &[0i32]).unwrap();
    assert!(a.set_range(4..5, &other).unwrap_err().is_bounds());
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3, 4]);
}

// ============================================================================
// Allocation failure
// ============================================================================

#[test]
fn test_allocation_error_is_recoverable() {
    let dev = Arc::new(HostBackend::new(0).with_memory_limit(32));
    let a = DeviceArray::from_host(&dev, &[1i64, 2, 3]).unwrap();
    let mut b = a.clone();
    // Detaching b would need another 24 bytes.
    let err = b.set(0, 9).unwrap_err();
    assert!(matches!(err, KilnError::Allocation { .. }));
    assert_eq!(b.copy_to_host().unwrap(), vec![1, 2, 3]);
    drop(a);
    b.set(0, 9).unwrap();
    assert_eq!(b.copy_to_host().unwrap(), vec![9, 2, 3]);
}
