
use std::sync::Arc;

use crate::common::{Error, FormatDescriptor, PixelLayout, Result};
use crate::config::{BackendPreference, PipelineConfig};
use crate::frame::Frame;
use crate::gpu::{Gpu, PendingReadback, TextureBinder};
use crate::kernel::{DifferenceKernel, GpuDifferencePipeline};
use crate::pool::{FrameBufferPool, PooledBuffer};

/// A two-frame filter driven by the pipeline controller.
///
/// All calls come from one serial context. `render` requires a successful
/// `prepare` for the frames' format; calling it unprepared is a contract
/// violation.
pub trait FilterRenderer: Send {
    fn description(&self) -> &str;

    fn is_prepared(&self) -> bool;

    /// Format the renderer was last prepared for.
    fn input_format(&self) -> Option<&FormatDescriptor>;

    /// Drops any previous resources and builds new ones for `format`.
    fn prepare(&mut self, format: &FormatDescriptor, retained_hint: usize) -> Result<()>;

    fn reset(&mut self);

    /// Filters `(previous, current)` into a fresh pool buffer.
    ///
    /// Every error is per-frame: the caller drops the frame and carries on.
    fn render(&mut self, previous: &Frame, current: &Frame) -> Result<PooledBuffer>;
}

/// Compute device the renderer dispatches to.
#[derive(Debug, Clone)]
pub enum RenderBackend {
    Cpu,
    Gpu(Gpu),
}

impl RenderBackend {
    /// GPU when an adapter is available, CPU otherwise.
    pub fn auto() -> Self {
        match Gpu::new() {
            Ok(gpu) => RenderBackend::Gpu(gpu),
            Err(e) => {
                tracing::warn!("GPU initialization failed, falling back to CPU: {}", e);
                RenderBackend::Cpu
            }
        }
    }

    pub fn from_preference(preference: BackendPreference) -> Result<Self> {
        match preference {
            BackendPreference::Auto => Ok(Self::auto()),
            BackendPreference::Gpu => Gpu::new().map(RenderBackend::Gpu),
            BackendPreference::Cpu => Ok(RenderBackend::Cpu),
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, RenderBackend::Gpu(_))
    }

    pub fn gpu(&self) -> Option<&Gpu> {
        match self {
            RenderBackend::Gpu(gpu) => Some(gpu),
            RenderBackend::Cpu => None,
        }
    }
}

#[derive(Debug)]
struct Prepared {
    input_format: FormatDescriptor,
    output_format: FormatDescriptor,
    pool: FrameBufferPool,
    binder: Option<TextureBinder>,
}

/// Frame renderer running the difference kernel over consecutive frames.
///
/// Goes `Unprepared -> Prepared` on `prepare` and back on `reset`. The
/// compiled GPU pipeline is device state and survives resets.
#[derive(Debug)]
pub struct MotionDetectRenderer {
    backend: RenderBackend,
    kernel: DifferenceKernel,
    pool_headroom: usize,
    texture_cache_frames: usize,
    description: String,
    pipeline: Option<Arc<GpuDifferencePipeline>>,
    prepared: Option<Prepared>,
}

impl MotionDetectRenderer {
    pub fn new(backend: RenderBackend, kernel: DifferenceKernel) -> Self {
        let config = PipelineConfig::default();
        Self::with_limits(backend, kernel, config.pool_headroom, config.texture_cache_frames)
    }

    pub fn from_config(backend: RenderBackend, config: &PipelineConfig) -> Self {
        Self::with_limits(
            backend,
            DifferenceKernel::new(config.difference_threshold),
            config.pool_headroom,
            config.texture_cache_frames,
        )
    }

    fn with_limits(
        backend: RenderBackend,
        kernel: DifferenceKernel,
        pool_headroom: usize,
        texture_cache_frames: usize,
    ) -> Self {
        let description = match &backend {
            RenderBackend::Cpu => "Motion Detection (CPU)".to_string(),
            RenderBackend::Gpu(gpu) => format!("Motion Detection (GPU: {})", gpu.adapter_name()),
        };

        Self {
            backend,
            kernel,
            pool_headroom,
            texture_cache_frames: texture_cache_frames.max(2),
            description,
            pipeline: None,
            prepared: None,
        }
    }

    pub fn backend(&self) -> &RenderBackend {
        &self.backend
    }

    pub fn kernel(&self) -> &DifferenceKernel {
        &self.kernel
    }

    pub fn pool(&self) -> Option<&FrameBufferPool> {
        self.prepared.as_ref().map(|p| &p.pool)
    }

    pub fn output_format(&self) -> Option<&FormatDescriptor> {
        self.prepared.as_ref().map(|p| &p.output_format)
    }

    /// Number of cached GPU views, zero on the CPU backend.
    pub fn cached_textures(&self) -> usize {
        self.prepared
            .as_ref()
            .and_then(|p| p.binder.as_ref())
            .map_or(0, |binder| binder.len())
    }

    fn ensure_pipeline(&mut self, gpu: &Gpu) -> Result<Arc<GpuDifferencePipeline>> {
        if let Some(pipeline) = &self.pipeline {
            return Ok(Arc::clone(pipeline));
        }
        let pipeline = Arc::new(GpuDifferencePipeline::new(gpu)?);
        self.pipeline = Some(Arc::clone(&pipeline));
        Ok(pipeline)
    }

    fn check_input(prepared: &Prepared, frame: &Frame) -> Result<()> {
        if *frame.format() != prepared.input_format {
            return Err(Error::FormatMismatch {
                expected: prepared.input_format,
                actual: *frame.format(),
            });
        }
        Ok(())
    }
}

impl FilterRenderer for MotionDetectRenderer {
    fn description(&self) -> &str {
        &self.description
    }

    fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    fn input_format(&self) -> Option<&FormatDescriptor> {
        self.prepared.as_ref().map(|p| &p.input_format)
    }

    fn prepare(&mut self, format: &FormatDescriptor, retained_hint: usize) -> Result<()> {
        self.reset();

        if format.layout != PixelLayout::Bgra8 {
            return Err(Error::UnsupportedPixelLayout(format.layout));
        }

        let output_format = *format;
        let pool = FrameBufferPool::configure(output_format, retained_hint, self.pool_headroom)?;

        let binder = match self.backend.clone() {
            RenderBackend::Cpu => None,
            RenderBackend::Gpu(gpu) => {
                self.ensure_pipeline(&gpu)?;
                Some(TextureBinder::new(gpu, output_format, self.texture_cache_frames))
            }
        };

        tracing::debug!(
            "prepared {} for {} with {} output buffers",
            self.description,
            format,
            pool.capacity()
        );

        self.prepared = Some(Prepared {
            input_format: *format,
            output_format,
            pool,
            binder,
        });

        Ok(())
    }

    fn reset(&mut self) {
        if self.prepared.take().is_some() {
            tracing::debug!("reset {}", self.description);
        }
    }

    fn render(&mut self, previous: &Frame, current: &Frame) -> Result<PooledBuffer> {
        let Some(prepared) = self.prepared.as_mut() else {
            debug_assert!(false, "render called on an unprepared renderer");
            return Err(Error::NotPrepared);
        };

        Self::check_input(prepared, previous)?;
        Self::check_input(prepared, current)?;

        let output = prepared.pool.acquire()?;

        let (binder, gpu) = match (prepared.binder.as_mut(), self.backend.gpu()) {
            (Some(binder), Some(gpu)) => (binder, gpu),
            _ => {
                let mut guard = output.lock_mut();
                self.kernel.apply_cpu(previous, current, guard.bytes_mut());
                drop(guard);
                return Ok(output);
            }
        };

        let pipeline = self.pipeline.as_ref().ok_or(Error::NoGpuContext)?;

        binder.begin_pass();
        let textures = binder.bind_frame(previous).and_then(|prev| {
            let cur = binder.bind_frame(current)?;
            let out = binder.bind_output(&output)?;
            Ok((prev, cur, out))
        });
        let (prev_tex, cur_tex, out_tex) = match textures {
            Ok(textures) => textures,
            Err(err) => {
                binder.flush();
                return Err(Error::Bind(err));
            }
        };

        if let Err(err) = self
            .kernel
            .apply_gpu(gpu, pipeline, &prev_tex, &cur_tex, &out_tex)
        {
            binder.flush();
            return Err(err);
        }

        output.set_pending(PendingReadback::new(
            gpu.clone(),
            Arc::clone(out_tex.staging()),
            out_tex.size(),
        ));

        Ok(output)
    }
}
