//! Buffer pool tests
//!
//! Covers slot identity reuse, capacity limits, resizing and release.

use rtcsource_media::*;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// IDENTITY AND REUSE
// ============================================================================

#[test]
fn test_identities_bounded_by_capacity() {
    let pool = BufferPool::new(3);
    let mut seen = HashSet::new();

    for _ in 0..20 {
        let held: Vec<_> = (0..3)
            .map(|_| pool.acquire(320, 240, PixelFormat::I420).unwrap())
            .collect();
        seen.extend(held.iter().filter_map(|lease| lease.slot_id()));
    }

    assert_eq!(seen.len(), 3);
    assert_eq!(pool.stats().allocated, 3);
}

#[test]
fn test_release_then_reacquire_returns_same_identity() {
    let pool = BufferPool::new(2);
    let first = pool.acquire(640, 480, PixelFormat::I420).unwrap();
    let _second = pool.acquire(640, 480, PixelFormat::I420).unwrap();
    let id = first.slot_id();
    drop(first);

    let again = pool.acquire(640, 480, PixelFormat::I420).unwrap();
    assert_eq!(again.slot_id(), id);
}

#[test]
fn test_frozen_buffer_holds_slot_until_last_clone_drops() {
    let pool = BufferPool::new(1);
    let buffer = pool.acquire(64, 64, PixelFormat::I420).unwrap().freeze();
    let clone = buffer.clone();

    drop(buffer);
    assert!(matches!(
        pool.acquire(64, 64, PixelFormat::I420),
        Err(MediaError::PoolExhausted { capacity: 1 })
    ));

    drop(clone);
    assert!(pool.acquire(64, 64, PixelFormat::I420).is_ok());
}

// ============================================================================
// EXHAUSTION
// ============================================================================

#[test]
fn test_capacity_two_three_concurrent_acquires() {
    let pool = Arc::new(BufferPool::new(2));
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let pool = pool.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                pool.acquire(640, 480, PixelFormat::I420)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(MediaError::PoolExhausted { .. })))
        .count();
    assert_eq!(exhausted, 1);

    let mut held: Vec<BufferLease> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(held.len(), 2);
    assert!(pool.acquire(640, 480, PixelFormat::I420).is_err());

    held.pop();
    assert!(pool.acquire(640, 480, PixelFormat::I420).is_ok());
}

#[test]
fn test_unpooled_fallback_is_not_reused() {
    let pool = BufferPool::new(1);
    let _held = pool.acquire(32, 32, PixelFormat::Bgra).unwrap();

    let fallback = pool.acquire_or_unpooled(32, 32, PixelFormat::Bgra).unwrap();
    assert!(!fallback.is_pooled());
    drop(fallback);

    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.borrowed, 1);
}

// ============================================================================
// RESIZE AND RELEASE
// ============================================================================

#[test]
fn test_resize_fails_iff_borrowed_exceeds_capacity() {
    let pool = BufferPool::new(4);
    let a = pool.acquire(16, 16, PixelFormat::I420).unwrap();
    let b = pool.acquire(16, 16, PixelFormat::I420).unwrap();
    drop(pool.acquire(16, 16, PixelFormat::I420).unwrap());
    assert_eq!(pool.stats().live, 3);

    assert!(!pool.resize(1));
    assert_eq!(pool.capacity(), 4);
    assert_eq!(pool.stats().live, 3);

    assert!(pool.resize(2));
    assert_eq!(pool.capacity(), 2);
    assert!(pool.stats().live <= 2);

    drop(a);
    drop(b);
    assert!(pool.resize(0));
    assert_eq!(pool.stats().live, 0);
}

#[test]
fn test_resize_grows_capacity() {
    let pool = BufferPool::new(1);
    let _a = pool.acquire(16, 16, PixelFormat::I420).unwrap();
    assert!(pool.resize(2));
    assert!(pool.acquire(16, 16, PixelFormat::I420).is_ok());
}

#[test]
fn test_release_drops_borrowed_slots() {
    let pool = BufferPool::new(2);
    let held = pool.acquire(16, 16, PixelFormat::I420).unwrap();
    pool.release();

    assert_eq!(pool.stats().live, 0);
    let a = pool.acquire(16, 16, PixelFormat::I420).unwrap();
    let b = pool.acquire(16, 16, PixelFormat::I420).unwrap();
    assert_ne!(a.slot_id(), held.slot_id());
    assert_ne!(b.slot_id(), held.slot_id());
}
