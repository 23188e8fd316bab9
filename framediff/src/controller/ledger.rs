use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::pool::{BufferId, PooledBuffer};

/// Output buffers handed to detection and not yet released.
///
/// Each buffer is retained once and released once; the map is keyed by
/// handout id so a second release of the same buffer finds nothing.
#[derive(Debug, Clone, Default)]
pub struct RetainedBuffers {
    inner: Arc<Mutex<HashMap<BufferId, PooledBuffer>>>,
}

impl RetainedBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `buffer` is already retained.
    pub fn retain(&self, buffer: &PooledBuffer) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(&buffer.id()) {
            tracing::warn!("buffer {} retained twice", buffer.id());
            return false;
        }
        inner.insert(buffer.id(), buffer.clone());
        true
    }

    /// Drops the ledger's reference to `id`. Returns false if it was not
    /// retained.
    pub fn release(&self, id: BufferId) -> bool {
        let released = self.inner.lock().remove(&id);
        match released {
            Some(_buffer) => true,
            None => {
                tracing::warn!("buffer {} released but not retained", id);
                false
            }
        }
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FormatDescriptor;
    use crate::pool::FrameBufferPool;

    #[test]
    fn release_returns_buffer_to_pool() {
        let pool = FrameBufferPool::configure(FormatDescriptor::bgra(2, 2), 1, 0).unwrap();
        let ledger = RetainedBuffers::new();

        let buffer = pool.acquire().unwrap();
        let id = buffer.id();
        assert!(ledger.retain(&buffer));
        drop(buffer);
        assert_eq!(pool.outstanding(), 1);

        assert!(ledger.release(id));
        assert_eq!(pool.outstanding(), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn double_release_is_a_no_op() {
        let pool = FrameBufferPool::configure(FormatDescriptor::bgra(2, 2), 1, 0).unwrap();
        let ledger = RetainedBuffers::new();

        let buffer = pool.acquire().unwrap();
        assert!(ledger.retain(&buffer));
        assert!(!ledger.retain(&buffer));

        assert!(ledger.release(buffer.id()));
        assert!(!ledger.release(buffer.id()));
    }

    #[test]
    fn concurrent_releases_release_once() {
        let pool = FrameBufferPool::configure(FormatDescriptor::bgra(2, 2), 1, 0).unwrap();
        let ledger = RetainedBuffers::new();
        let buffer = pool.acquire().unwrap();
        let id = buffer.id();
        ledger.retain(&buffer);
        drop(buffer);

        let released: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let ledger = ledger.clone();
                    s.spawn(move || ledger.release(id) as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(released, 1);
        assert_eq!(pool.outstanding(), 0);
    }
}
