mod readback;
mod texture_binder;

use std::sync::Arc;

pub(crate) use self::readback::PendingReadback;
pub use self::texture_binder::{BindKey, OutputTexture, Texture, TextureBinder};

use crate::common::{Error, Result};

/// Threads per workgroup along x. Matches the SIMD width of current desktop
/// and mobile GPUs.
const PREFERRED_EXECUTION_WIDTH: u32 = 16;
const MAX_WORKGROUP_ROWS: u32 = 16;

/// GPU context holding the wgpu device and queue for compute work.
#[derive(Debug, Clone)]
pub struct Gpu {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: Arc<str>,
}

impl Gpu {
    /// Creates a new GPU context, initializing wgpu with default settings.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| Error::Gpu(format!("failed to find suitable GPU adapter: {}", e)))?;

        let info = adapter.get_info();
        tracing::info!("using GPU adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("framediff"),
            ..Default::default()
        }))
        .map_err(|e| Error::Gpu(format!("failed to create device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: info.name.into(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Blocks until all submitted work has completed and map callbacks ran.
    pub fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| Error::Gpu(format!("device poll failed: {}", e)))
    }

    /// Workgroup shape the difference kernel is compiled with on this device.
    pub fn preferred_workgroup_size(&self) -> WorkgroupSize {
        WorkgroupSize::from_limits(&self.device.limits())
    }
}

/// Threads per workgroup of a 2-D compute dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Picks the widest execution width the limits allow, then as many rows
    /// as still fit in one workgroup.
    pub fn from_limits(limits: &wgpu::Limits) -> Self {
        let x = PREFERRED_EXECUTION_WIDTH
            .min(limits.max_compute_workgroup_size_x)
            .max(1);
        let y = (limits.max_compute_invocations_per_workgroup / x)
            .min(limits.max_compute_workgroup_size_y)
            .min(MAX_WORKGROUP_ROWS)
            .max(1);

        Self { x, y }
    }

    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Number of workgroups per axis covering a `width` x `height` grid.
    ///
    /// Rounds up, so edge workgroups may run past the image; the kernel
    /// skips out-of-bounds invocations.
    pub fn dispatch_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.x), height.div_ceil(self.y))
    }
}

impl std::fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} ({} invocations)", self.x, self.y, self.total())
    }
}
