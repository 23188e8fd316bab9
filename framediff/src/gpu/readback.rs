use std::sync::Arc;
use std::time::Duration;

use common::Slot;
use wgpu::BufferAsyncError;

use super::Gpu;
use crate::common::{Error, Result};
use crate::pool::Readback;

const MAP_TIMEOUT: Duration = Duration::from_secs(5);

/// A GPU result that has been copied into a mappable staging buffer but not
/// yet read back to host memory.
#[derive(Debug)]
pub(crate) struct PendingReadback {
    gpu: Gpu,
    staging: Arc<wgpu::Buffer>,
    size: u64,
}

impl PendingReadback {
    pub(crate) fn new(gpu: Gpu, staging: Arc<wgpu::Buffer>, size: u64) -> Self {
        Self { gpu, staging, size }
    }
}

impl Readback for PendingReadback {
    /// Waits for the GPU, maps the staging buffer and copies it into `dst`.
    fn complete_into(self: Box<Self>, dst: &mut [u8]) -> Result<()> {
        debug_assert_eq!(dst.len() as u64, self.size, "readback size mismatch");

        let slot = Arc::new(Slot::<std::result::Result<(), BufferAsyncError>>::new());
        let buffer_slice = self.staging.slice(..self.size);
        buffer_slice.map_async(wgpu::MapMode::Read, {
            let slot = Arc::clone(&slot);
            move |result| {
                slot.send(result);
            }
        });

        self.gpu.wait()?;

        slot.wait_take(MAP_TIMEOUT)
            .ok_or_else(|| Error::Readback("timed out waiting for buffer map".to_string()))?
            .map_err(|err| Error::Readback(err.to_string()))?;

        {
            let data = buffer_slice.get_mapped_range();
            dst.copy_from_slice(&data);
        }
        self.staging.unmap();

        Ok(())
    }
}
