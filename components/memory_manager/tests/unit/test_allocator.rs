//! Unit tests for BoundedAllocator accounting

use memory_manager::{lua_alloc, BoundedAllocator};
use std::ffi::c_void;
use std::ptr;

#[test]
fn test_request_larger_than_budget_is_refused() {
    let allocator = BoundedAllocator::new(1024);
    let p = unsafe { allocator.reallocate(ptr::null_mut(), 0, 2048) };
    assert!(p.is_null());
    assert_eq!(allocator.remaining(), 1024);
    assert_eq!(allocator.refused(), 1);
}

#[test]
fn test_exact_budget_is_allowed() {
    let allocator = BoundedAllocator::new(128);
    unsafe {
        let p = allocator.reallocate(ptr::null_mut(), 0, 128);
        assert!(!p.is_null());
        assert_eq!(allocator.remaining(), 0);
        assert!(allocator.reallocate(ptr::null_mut(), 0, 1).is_null());
        allocator.reallocate(p, 128, 0);
    }
    assert_eq!(allocator.remaining(), 128);
}

#[test]
fn test_growth_beyond_budget_keeps_block() {
    let allocator = BoundedAllocator::new(100);
    unsafe {
        let p = allocator.reallocate(ptr::null_mut(), 0, 60);
        *p = 42;
        assert!(allocator.reallocate(p, 60, 200).is_null());
        // The original block is untouched and still owned by the caller.
        assert_eq!(*p, 42);
        assert_eq!(allocator.in_use(), 60);
        allocator.reallocate(p, 60, 0);
    }
}

#[test]
fn test_resize_preserves_contents() {
    let allocator = BoundedAllocator::new(1 << 16);
    unsafe {
        let p = allocator.reallocate(ptr::null_mut(), 0, 8);
        for i in 0..8 {
            *p.add(i) = i as u8;
        }
        let q = allocator.reallocate(p, 8, 4096);
        for i in 0..8 {
            assert_eq!(*q.add(i), i as u8);
        }
        allocator.reallocate(q, 4096, 0);
    }
}

#[test]
fn test_stats_snapshot() {
    let allocator = BoundedAllocator::new(512);
    unsafe {
        let p = allocator.reallocate(ptr::null_mut(), 0, 200);
        allocator.reallocate(ptr::null_mut(), 0, 1000);
        let stats = allocator.stats();
        assert_eq!(stats.limit, 512);
        assert_eq!(stats.in_use, 200);
        assert_eq!(stats.remaining, 312);
        assert_eq!(stats.peak, 200);
        assert_eq!(stats.refused, 1);
        allocator.reallocate(p, 200, 0);
    }
}

#[test]
fn test_entry_point_uses_user_data() {
    let allocator = BoundedAllocator::new(64);
    let ud = &allocator as *const BoundedAllocator as *mut c_void;
    unsafe {
        let p = lua_alloc(ud, ptr::null_mut(), 0, 48);
        assert!(!p.is_null());
        assert_eq!(allocator.in_use(), 48);
        assert!(lua_alloc(ud, ptr::null_mut(), 0, 48).is_null());
        assert!(lua_alloc(ud, p, 48, 0).is_null());
    }
    assert_eq!(allocator.in_use(), 0);
}
