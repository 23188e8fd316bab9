#[cfg(test)]
mod tests;

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{Error, FormatDescriptor, Result};

static NEXT_POOL_CONFIG: AtomicU64 = AtomicU64::new(1);

/// Identity of one handout of a pool slot.
///
/// `config` changes every time a pool is rebuilt and `generation` every time
/// the slot is acquired, so two ids are equal only for clones of the same
/// handout.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct BufferId {
    pub config: u64,
    pub index: u32,
    pub generation: u32,
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.config, self.index, self.generation)
    }
}

#[derive(Debug)]
struct PoolState {
    free: Vec<(u32, Vec<u8>)>,
    generations: Vec<u32>,
}

#[derive(Debug)]
struct PoolShared {
    config: u64,
    format: FormatDescriptor,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn give_back(&self, index: u32, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        debug_assert!(
            state.free.iter().all(|(i, _)| *i != index),
            "pool slot {} returned twice",
            index
        );
        state.free.push((index, bytes));
    }
}

/// A bounded set of preallocated output buffers sharing one format.
///
/// Buffers go back to the pool when the last handle to them is dropped.
/// Dropping the pool invalidates it: buffers still in flight are freed
/// instead of returned, so a rebuilt pool never hands out stale storage.
#[derive(Debug)]
pub struct FrameBufferPool {
    shared: Arc<PoolShared>,
}

impl FrameBufferPool {
    /// Allocates `retained_hint + headroom` zeroed buffers of `format`.
    ///
    /// `retained_hint` is how many buffers the caller may hold at once while
    /// results travel from dispatch to consumption.
    pub fn configure(format: FormatDescriptor, retained_hint: usize, headroom: usize) -> Result<Self> {
        if format.is_empty() {
            return Err(Error::Config(format!("cannot pool empty format {}", format)));
        }
        let capacity = retained_hint + headroom;
        if capacity == 0 {
            return Err(Error::Config("pool capacity must be positive".to_string()));
        }

        let size = format.size_in_bytes();
        let free = (0..capacity as u32)
            .rev()
            .map(|index| (index, vec![0u8; size]))
            .collect();

        let config = NEXT_POOL_CONFIG.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("configured buffer pool {} with {} x {}", config, capacity, format);

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                format,
                capacity,
                state: Mutex::new(PoolState {
                    free,
                    generations: vec![0; capacity],
                }),
            }),
        })
    }

    /// Takes a free buffer, or `Error::PoolExhausted` when every buffer is in flight.
    pub fn acquire(&self) -> Result<PooledBuffer> {
        let mut state = self.shared.state.lock();
        let (index, bytes) = state.free.pop().ok_or(Error::PoolExhausted)?;

        let generation = &mut state.generations[index as usize];
        *generation = generation.wrapping_add(1);

        let id = BufferId {
            config: self.shared.config,
            index,
            generation: *generation,
        };

        Ok(PooledBuffer {
            inner: Arc::new(BufferInner {
                id,
                format: self.shared.format,
                pool: Arc::downgrade(&self.shared),
                storage: RwLock::new(BufferStorage {
                    bytes,
                    pending: None,
                    failure: None,
                }),
            }),
        })
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.shared.format
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of buffers ready to be acquired.
    pub fn available(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    /// Number of buffers currently held by callers.
    pub fn outstanding(&self) -> usize {
        self.capacity() - self.available()
    }
}

/// Contents of a buffer that still live on the device.
pub(crate) trait Readback: Send + Sync + std::fmt::Debug {
    /// Waits for the device and copies the contents into `dst`.
    fn complete_into(self: Box<Self>, dst: &mut [u8]) -> Result<()>;
}

#[derive(Debug)]
struct BufferStorage {
    bytes: Vec<u8>,
    pending: Option<Box<dyn Readback>>,
    /// Set when the readback failed; `bytes` then hold a previous handout.
    failure: Option<String>,
}

impl BufferStorage {
    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(Error::Readback(reason.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct BufferInner {
    id: BufferId,
    format: FormatDescriptor,
    pool: Weak<PoolShared>,
    storage: RwLock<BufferStorage>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let bytes = std::mem::take(&mut self.storage.get_mut().bytes);
        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(self.id.index, bytes);
        }
    }
}

/// Reference-counted handle to an output buffer on loan from a pool.
///
/// Clones share the same storage. The slot returns to its pool when the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct PooledBuffer {
    inner: Arc<BufferInner>,
}

impl PooledBuffer {
    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.inner.format
    }

    pub fn width(&self) -> u32 {
        self.inner.format.width
    }

    pub fn height(&self) -> u32 {
        self.inner.format.height
    }

    /// Makes the contents host-visible and pins them until the guard drops.
    ///
    /// Any number of guards may be held at once. The first lock after a GPU
    /// render waits for the copy back; if that fails, every later lock fails
    /// too until the buffer is rewritten.
    pub fn lock(&self) -> Result<BufferReadGuard<'_>> {
        let storage = self.inner.storage.read();
        let storage = if storage.pending.is_some() {
            drop(storage);
            self.finish_readback()
        } else {
            storage
        };
        storage.check_failure()?;
        tracing::trace!("locked buffer {}", self.inner.id);

        Ok(BufferReadGuard {
            id: self.inner.id,
            format: self.inner.format,
            storage,
        })
    }

    fn finish_readback(&self) -> RwLockReadGuard<'_, BufferStorage> {
        let mut storage = self.inner.storage.write();
        // another reader may have finished it while we waited
        if let Some(pending) = storage.pending.take() {
            if let Err(err) = pending.complete_into(&mut storage.bytes) {
                tracing::warn!("readback of buffer {} failed: {}", self.inner.id, err);
                storage.failure = Some(match err {
                    Error::Readback(reason) => reason,
                    other => other.to_string(),
                });
            }
        }
        RwLockWriteGuard::downgrade(storage)
    }

    /// Returns true while a GPU result has not been copied back yet.
    pub fn is_pending(&self) -> bool {
        self.inner.storage.read().pending.is_some()
    }

    pub(crate) fn lock_mut(&self) -> BufferWriteGuard<'_> {
        let mut storage = self.inner.storage.write();
        storage.pending = None;
        storage.failure = None;
        BufferWriteGuard { storage }
    }

    pub(crate) fn set_pending(&self, readback: impl Readback + 'static) {
        let mut storage = self.inner.storage.write();
        storage.pending = Some(Box::new(readback));
        storage.failure = None;
    }
}

/// Scoped read access to a locked buffer. Dropping it unlocks the buffer.
#[derive(Debug)]
pub struct BufferReadGuard<'a> {
    id: BufferId,
    format: FormatDescriptor,
    storage: RwLockReadGuard<'a, BufferStorage>,
}

impl BufferReadGuard<'_> {
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    pub fn bytes_per_row(&self) -> usize {
        self.format.row_bytes()
    }

    /// Returns the four channel bytes of pixel `(x, y)` in memory order.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.bytes_per_row() + x as usize * 4;
        let p = &self.storage.bytes[offset..offset + 4];
        [p[0], p[1], p[2], p[3]]
    }
}

impl Deref for BufferReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage.bytes
    }
}

impl Drop for BufferReadGuard<'_> {
    fn drop(&mut self) {
        tracing::trace!("unlocked buffer {}", self.id);
    }
}

#[derive(Debug)]
pub(crate) struct BufferWriteGuard<'a> {
    storage: RwLockWriteGuard<'a, BufferStorage>,
}

impl BufferWriteGuard<'_> {
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage.bytes
    }
}
