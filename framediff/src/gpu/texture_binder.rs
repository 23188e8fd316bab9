use std::sync::Arc;

use hashbrown::HashMap;

use super::Gpu;
use crate::common::{BindError, FormatDescriptor, PixelLayout};
use crate::frame::{Frame, FrameId};
use crate::pool::PooledBuffer;

/// Cache key of a GPU view.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum BindKey {
    /// An uploaded capture frame.
    Frame(FrameId),
    /// The resident output storage of one pool slot.
    Output { config: u64, index: u32 },
}

impl BindKey {
    fn is_frame(&self) -> bool {
        matches!(self, BindKey::Frame(_))
    }
}

/// GPU-side view of a frame or pool buffer: a storage buffer of packed
/// BGRA pixels, one `u32` per pixel.
///
/// Only valid while its cache entry lives; fetch a fresh one per render.
#[derive(Debug, Clone)]
pub struct Texture {
    buffer: Arc<wgpu::Buffer>,
    format: FormatDescriptor,
}

impl Texture {
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn as_entire_binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// A writable texture together with the staging buffer its contents are
/// copied to for host readback.
#[derive(Debug, Clone)]
pub struct OutputTexture {
    texture: Texture,
    staging: Arc<wgpu::Buffer>,
}

impl OutputTexture {
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn staging(&self) -> &Arc<wgpu::Buffer> {
        &self.staging
    }

    pub fn size(&self) -> u64 {
        self.texture.format.size_in_bytes() as u64
    }
}

/// Device allocations behind one cache entry.
#[derive(Debug, Clone)]
struct Resident {
    buffer: Arc<wgpu::Buffer>,
    staging: Option<Arc<wgpu::Buffer>>,
}

#[derive(Debug)]
struct CacheEntry<T> {
    value: T,
    last_used: u64,
}

/// Pass-scoped LRU bookkeeping for bound views. Only frame entries count
/// against the capacity; output entries live until the next flush.
#[derive(Debug)]
struct BindCache<T> {
    frame_capacity: usize,
    entries: HashMap<BindKey, CacheEntry<T>>,
    epoch: u64,
}

impl<T: Clone> BindCache<T> {
    fn new(frame_capacity: usize) -> Self {
        Self {
            frame_capacity,
            entries: HashMap::new(),
            epoch: 0,
        }
    }

    fn begin_pass(&mut self) {
        self.epoch += 1;
    }

    /// Returns the cached value and pins it for the current pass.
    fn touch(&mut self, key: &BindKey) -> Option<T> {
        let entry = self.entries.get_mut(key)?;
        entry.last_used = self.epoch;
        Some(entry.value.clone())
    }

    fn insert(&mut self, key: BindKey, value: T) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                last_used: self.epoch,
            },
        );
    }

    fn frame_entries(&self) -> usize {
        self.entries.keys().filter(|key| key.is_frame()).count()
    }

    fn make_room_for_frame(&mut self) -> Result<(), BindError> {
        if self.frame_entries() < self.frame_capacity {
            return Ok(());
        }

        let victim = eviction_candidate(
            self.entries.iter().map(|(key, entry)| (key, entry.last_used)),
            self.epoch,
        )
        .ok_or(BindError::CacheExhausted {
            capacity: self.frame_capacity,
        })?;

        self.entries.remove(&victim);
        Ok(())
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Exposes frames and pool buffers to the compute unit, caching the GPU
/// allocations behind them.
///
/// A frame is uploaded once and then served from the cache, so the frame
/// bound as `current` in one render is reused as `previous` in the next.
/// Output storage is allocated once per pool slot. Entries touched since
/// the last [`begin_pass`](Self::begin_pass) are pinned and never evicted.
#[derive(Debug)]
pub struct TextureBinder {
    gpu: Gpu,
    format: FormatDescriptor,
    cache: BindCache<Resident>,
}

impl TextureBinder {
    pub fn new(gpu: Gpu, format: FormatDescriptor, frame_capacity: usize) -> Self {
        debug_assert!(frame_capacity >= 2, "a render binds two frames");
        Self {
            gpu,
            format,
            cache: BindCache::new(frame_capacity),
        }
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Starts a new render: entries bound from now on are pinned until the
    /// next call.
    pub fn begin_pass(&mut self) {
        self.cache.begin_pass();
    }

    /// Returns the GPU view of `frame`, uploading it on first use.
    pub fn bind_frame(&mut self, frame: &Frame) -> Result<Texture, BindError> {
        self.check_format(frame.format())?;

        let key = BindKey::Frame(frame.id());
        if let Some(resident) = self.cache.touch(&key) {
            return Ok(self.texture(resident.buffer));
        }

        self.cache.make_room_for_frame()?;

        let buffer = self.create_buffer(
            "frame_texture",
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        )?;
        self.gpu
            .queue()
            .write_buffer(&buffer, 0, &frame.packed_bytes());

        self.cache.insert(
            key,
            Resident {
                buffer: Arc::clone(&buffer),
                staging: None,
            },
        );

        Ok(self.texture(buffer))
    }

    /// Returns the writable GPU view backing the pool slot of `buffer`.
    pub fn bind_output(&mut self, buffer: &PooledBuffer) -> Result<OutputTexture, BindError> {
        self.check_format(buffer.format())?;

        let id = buffer.id();
        let key = BindKey::Output {
            config: id.config,
            index: id.index,
        };

        let resident = match self.cache.touch(&key) {
            Some(resident) => resident,
            None => {
                let resident = Resident {
                    buffer: self.create_buffer(
                        "output_texture",
                        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    )?,
                    staging: Some(self.create_buffer(
                        "output_staging",
                        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    )?),
                };
                self.cache.insert(key, resident.clone());
                resident
            }
        };

        let staging = resident
            .staging
            .ok_or_else(|| BindError::Gpu("output entry has no staging buffer".to_string()))?;

        Ok(OutputTexture {
            texture: self.texture(resident.buffer),
            staging,
        })
    }

    /// Drops every cached view. Views already handed out stay valid until
    /// their holders release them.
    pub fn flush(&mut self) {
        tracing::debug!("flushing texture cache ({} entries)", self.cache.len());
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_format(&self, format: &FormatDescriptor) -> Result<(), BindError> {
        if format.layout != PixelLayout::Bgra8 {
            return Err(BindError::UnsupportedPixelLayout(format.layout));
        }
        if format.width != self.format.width || format.height != self.format.height {
            return Err(BindError::SizeMismatch {
                expected: self.format,
                actual: *format,
            });
        }
        Ok(())
    }

    fn create_buffer(
        &self,
        label: &str,
        usage: wgpu::BufferUsages,
    ) -> Result<Arc<wgpu::Buffer>, BindError> {
        let device = self.gpu.device();
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: self.format.size_in_bytes() as u64,
            usage,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BindError::Gpu(err.to_string()));
        }

        Ok(Arc::new(buffer))
    }

    fn texture(&self, buffer: Arc<wgpu::Buffer>) -> Texture {
        Texture {
            buffer,
            format: self.format,
        }
    }
}

/// Picks the least recently used frame entry that is not pinned by the
/// current pass.
fn eviction_candidate<'a>(
    entries: impl Iterator<Item = (&'a BindKey, u64)>,
    epoch: u64,
) -> Option<BindKey> {
    entries
        .filter(|(key, last_used)| key.is_frame() && *last_used < epoch)
        .min_by_key(|(_, last_used)| *last_used)
        .map(|(key, _)| *key)
}
