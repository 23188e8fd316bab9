// Formats and errors
pub use crate::common::{BindError, ColorSpace, Error, FormatDescriptor, PixelLayout, Result};

// Frames
pub use crate::frame::{Frame, FrameId, FrameWindow};

// Configuration
pub use crate::config::{BackendPreference, PipelineConfig};

// Buffer pool
pub use crate::pool::{BufferId, BufferReadGuard, FrameBufferPool, PooledBuffer};

// GPU
pub use crate::gpu::{BindKey, Gpu, OutputTexture, Texture, TextureBinder, WorkgroupSize};

// Kernel
pub use crate::kernel::{is_changed, DifferenceKernel, GpuDifferencePipeline};

// Rendering and detection
pub use crate::motion::{DetectionResult, MotionEvaluator, MotionEvidence};
pub use crate::renderer::{FilterRenderer, MotionDetectRenderer, RenderBackend};

// Pipeline
pub use crate::controller::{
    DisplaySink, FramePipelineController, FrameSender, MotionAlertSink, PipelineMessage,
    PipelineStats, RetainedBuffers,
};

// Capture
pub use crate::capture::{
    AuthorizationStatus, CaptureSession, CaptureSource, SetupResult, SyntheticCaptureSource,
};
