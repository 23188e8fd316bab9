use std::sync::OnceLock;

use crate::common::FormatDescriptor;
use crate::frame::Frame;
use crate::gpu::Gpu;
use crate::pool::{FrameBufferPool, PooledBuffer};

/// Shared GPU context for tests, or `None` on machines without an adapter.
pub fn test_gpu() -> Option<Gpu> {
    static GPU: OnceLock<Option<Gpu>> = OnceLock::new();
    GPU.get_or_init(|| match Gpu::new() {
        Ok(gpu) => Some(gpu),
        Err(err) => {
            eprintln!("GPU not available, skipping GPU tests: {}", err);
            None
        }
    })
    .clone()
}

/// Opaque grey frame.
pub fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
    Frame::filled(FormatDescriptor::bgra(width, height), [value, value, value, 255]).unwrap()
}

/// Grey `background` frame with a `size` x `size` square of `value` whose
/// top-left corner is at `origin`.
pub fn frame_with_square(
    width: u32,
    height: u32,
    background: u8,
    origin: (u32, u32),
    size: u32,
    value: u8,
) -> Frame {
    let format = FormatDescriptor::bgra(width, height);
    let mut bytes = vec![0u8; format.size_in_bytes()];
    for y in 0..height {
        for x in 0..width {
            let inside = (origin.0..origin.0 + size).contains(&x) && (origin.1..origin.1 + size).contains(&y);
            let v = if inside { value } else { background };
            let offset = (y * width + x) as usize * 4;
            bytes[offset..offset + 4].copy_from_slice(&[v, v, v, 255]);
        }
    }
    Frame::new(format, bytes).unwrap()
}

/// Acquires a buffer from `pool` and fills it with unchanged grey pixels,
/// then writes the "changed" sentinel at each of `changed`.
pub fn buffer_with_sentinels(pool: &FrameBufferPool, changed: &[(u32, u32)]) -> PooledBuffer {
    let buffer = pool.acquire().unwrap();
    let row_bytes = buffer.format().row_bytes();
    {
        let mut guard = buffer.lock_mut();
        let bytes = guard.bytes_mut();
        for px in bytes.chunks_exact_mut(4) {
            px.copy_from_slice(&[40, 40, 40, 255]);
        }
        for &(x, y) in changed {
            let offset = y as usize * row_bytes + x as usize * 4;
            bytes[offset..offset + 4].copy_from_slice(&[0, 0, 180, 255]);
        }
    }
    buffer
}
