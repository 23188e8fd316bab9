use std::sync::mpsc;
use std::time::Duration;

use super::*;

/// Readback that fails the way a timed out staging map does.
#[derive(Debug)]
struct FailingReadback;

impl Readback for FailingReadback {
    fn complete_into(self: Box<Self>, _dst: &mut [u8]) -> Result<()> {
        Err(Error::Readback("timed out waiting for buffer map".to_string()))
    }
}

/// Readback that writes a fixed pixel into the first slot.
#[derive(Debug)]
struct PixelReadback([u8; 4]);

impl Readback for PixelReadback {
    fn complete_into(self: Box<Self>, dst: &mut [u8]) -> Result<()> {
        dst[..4].copy_from_slice(&self.0);
        Ok(())
    }
}

fn pool(width: u32, height: u32, hint: usize) -> FrameBufferPool {
    FrameBufferPool::configure(FormatDescriptor::bgra(width, height), hint, 2).unwrap()
}

#[test]
fn capacity_covers_hint_and_headroom() {
    let pool = pool(8, 4, 3);
    assert_eq!(pool.capacity(), 5);
    assert_eq!(pool.available(), 5);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn configure_rejects_empty_format() {
    let err = FrameBufferPool::configure(FormatDescriptor::bgra(0, 4), 3, 2).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn every_acquired_buffer_matches_pool_format() {
    let format = FormatDescriptor::bgra(33, 17);
    let pool = FrameBufferPool::configure(format, 3, 1).unwrap();

    let buffers: Vec<PooledBuffer> = (0..pool.capacity())
        .map(|_| pool.acquire().unwrap())
        .collect();

    for buffer in &buffers {
        assert_eq!(*buffer.format(), format);
        let guard = buffer.lock().unwrap();
        assert_eq!(guard.len(), format.size_in_bytes());
        assert!(guard.iter().all(|&b| b == 0), "buffers start zeroed");
    }
}

#[test]
fn exhaustion_is_recoverable() {
    let pool = pool(4, 4, 1);
    let a = pool.acquire().unwrap();
    let _b = pool.acquire().unwrap();
    let _c = pool.acquire().unwrap();

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, Error::PoolExhausted));
    assert!(err.is_recoverable());

    drop(a);
    assert!(pool.acquire().is_ok());
}

#[test]
fn buffer_returns_only_after_last_clone_drops() {
    let pool = pool(4, 4, 0);
    assert_eq!(pool.capacity(), 2);

    let buffer = pool.acquire().unwrap();
    let clone = buffer.clone();
    assert_eq!(clone.id(), buffer.id());
    assert_eq!(pool.outstanding(), 1);

    drop(buffer);
    assert_eq!(pool.outstanding(), 1);

    drop(clone);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn reacquired_slot_gets_new_generation() {
    let pool = pool(4, 4, 0);
    let first = pool.acquire().unwrap();
    let first_id = first.id();
    drop(first);

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(pool.acquire().unwrap().id());
    }

    assert!(ids.iter().all(|id| *id != first_id));
    assert!(ids.iter().all(|id| id.config == first_id.config));
}

#[test]
fn rebuilt_pool_never_receives_stale_buffers() {
    let old_pool = pool(4, 4, 1);
    let stale = old_pool.acquire().unwrap();
    let old_config = stale.id().config;
    drop(old_pool);

    let new_pool = pool(8, 8, 1);
    drop(stale);
    assert_eq!(new_pool.available(), new_pool.capacity());

    let held: Vec<PooledBuffer> = (0..new_pool.capacity())
        .map(|_| new_pool.acquire().unwrap())
        .collect();
    for buffer in &held {
        assert_ne!(buffer.id().config, old_config);
        assert_eq!(buffer.width(), 8);
    }
    assert!(matches!(new_pool.acquire(), Err(Error::PoolExhausted)));
}

#[test]
fn written_contents_are_visible_through_lock() {
    let pool = pool(2, 2, 1);
    let buffer = pool.acquire().unwrap();
    {
        let mut guard = buffer.lock_mut();
        guard.bytes_mut()[4..8].copy_from_slice(&[0, 0, 200, 255]);
    }

    assert!(!buffer.is_pending());
    let guard = buffer.lock().unwrap();
    assert_eq!(guard.pixel(1, 0), [0, 0, 200, 255]);
}

#[test]
fn lock_is_released_on_drop() {
    let pool = pool(2, 2, 1);
    let buffer = pool.acquire().unwrap();

    {
        let _guard = buffer.lock().unwrap();
    }

    let other = buffer.clone();
    let handle = std::thread::spawn(move || other.lock().map(|g| g.len()).unwrap());
    assert_eq!(handle.join().unwrap(), 16);
}

#[test]
fn readers_share_the_lock() {
    let pool = pool(2, 2, 1);
    let buffer = pool.acquire().unwrap();
    let _held = buffer.lock().unwrap();

    let other = buffer.clone();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let len = other.lock().map(|g| g.len()).unwrap();
        tx.send(len).unwrap();
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(16));
}

#[test]
fn pending_readback_completes_once() {
    let pool = pool(2, 2, 1);
    let buffer = pool.acquire().unwrap();
    buffer.set_pending(PixelReadback([1, 2, 3, 4]));
    assert!(buffer.is_pending());

    assert_eq!(buffer.lock().unwrap().pixel(0, 0), [1, 2, 3, 4]);
    assert!(!buffer.is_pending());
    assert_eq!(buffer.lock().unwrap().pixel(0, 0), [1, 2, 3, 4]);
}

#[test]
fn failed_readback_keeps_failing() {
    let pool = pool(2, 2, 1);
    let buffer = pool.acquire().unwrap();
    {
        let mut guard = buffer.lock_mut();
        guard.bytes_mut()[..4].copy_from_slice(&[9, 9, 9, 255]);
    }
    buffer.set_pending(FailingReadback);

    assert!(matches!(buffer.lock(), Err(Error::Readback(_))));
    let again = buffer.clone().lock().map(|g| g.pixel(0, 0));
    assert!(matches!(again, Err(Error::Readback(_))));

    buffer.lock_mut();
    assert!(buffer.lock().is_ok());
}
