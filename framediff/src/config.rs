//! Pipeline configuration.
//!
//! `PipelineConfig` is plain data with serde support so it can live in a
//! YAML file next to the application.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::kernel::DEFAULT_DIFFERENCE_THRESHOLD;
use crate::motion::{DEFAULT_MOTION_THRESHOLD, DEFAULT_SAMPLE_STRIDE};

/// Where the difference kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// GPU when an adapter is available, CPU otherwise.
    #[default]
    Auto,
    /// GPU required; no adapter is a configuration error.
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub backend: BackendPreference,
    /// Output buffers the pipeline may hold at once between dispatch and
    /// consumption.
    pub retained_buffer_hint: usize,
    /// Extra pool buffers on top of `retained_buffer_hint`.
    pub pool_headroom: usize,
    /// Uploaded frames kept resident on the GPU.
    pub texture_cache_frames: usize,
    /// Per-pixel luma difference in `[0, 1]` above which a pixel is changed.
    pub difference_threshold: f32,
    /// Changed samples needed, exclusive, to report motion.
    pub motion_threshold: usize,
    pub sample_stride: usize,
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            retained_buffer_hint: 3,
            pool_headroom: 2,
            texture_cache_frames: 4,
            difference_threshold: DEFAULT_DIFFERENCE_THRESHOLD,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file is missing or
    /// invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    "using default pipeline config, failed to load {}: {}",
                    path.as_ref().display(),
                    err
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_yml::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retained_buffer_hint == 0 {
            return Err(Error::Config("retained_buffer_hint must be at least 1".to_string()));
        }
        if self.texture_cache_frames < 2 {
            return Err(Error::Config("texture_cache_frames must be at least 2".to_string()));
        }
        if self.sample_stride == 0 {
            return Err(Error::Config("sample_stride must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.difference_threshold) {
            return Err(Error::Config(format!(
                "difference_threshold {} is outside [0, 1]",
                self.difference_threshold
            )));
        }
        Ok(())
    }

    pub fn backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    pub fn retained_buffer_hint(mut self, hint: usize) -> Self {
        self.retained_buffer_hint = hint;
        self
    }

    pub fn pool_headroom(mut self, headroom: usize) -> Self {
        self.pool_headroom = headroom;
        self
    }

    pub fn difference_threshold(mut self, threshold: f32) -> Self {
        self.difference_threshold = threshold;
        self
    }

    pub fn motion_threshold(mut self, threshold: usize) -> Self {
        self.motion_threshold = threshold;
        self
    }
}
