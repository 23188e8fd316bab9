use std::io;

use thiserror::Error;

use crate::common::format::{FormatDescriptor, PixelLayout};

/// Reasons a buffer could not be exposed to the compute unit.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindError {
    #[error("pixel layout {0} cannot be bound as a BGRA texture")]
    UnsupportedPixelLayout(PixelLayout),
    #[error("buffer is {actual}, texture cache is configured for {expected}")]
    SizeMismatch {
        expected: FormatDescriptor,
        actual: FormatDescriptor,
    },
    #[error("texture cache exhausted: all {capacity} frame entries are in use")]
    CacheExhausted { capacity: usize },
    #[error("GPU view creation failed: {0}")]
    Gpu(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no capture device available")]
    NoCaptureDevice,
    #[error("could not create capture input: {0}")]
    CaptureInput(String),
    #[error("capture access not authorized")]
    NotAuthorized,
    #[error("GPU error: {0}")]
    Gpu(String),
    #[error("GPU context not available")]
    NoGpuContext,
    #[error("renderer used before prepare()")]
    NotPrepared,
    #[error("output buffer pool exhausted")]
    PoolExhausted,
    #[error("texture bind failed: {0}")]
    Bind(#[from] BindError),
    #[error("command submission failed: {0}")]
    Submission(String),
    #[error("frame format {actual} does not match prepared format {expected}")]
    FormatMismatch {
        expected: FormatDescriptor,
        actual: FormatDescriptor,
    },
    #[error("unsupported pixel layout: {0}")]
    UnsupportedPixelLayout(PixelLayout),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("buffer readback failed: {0}")]
    Readback(String),
    #[error("pipeline is not running")]
    PipelineClosed,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),
}

impl Error {
    /// Per-frame failures are recoverable: the frame is dropped and the
    /// pipeline stays prepared. Everything else ends startup.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PoolExhausted
                | Error::Bind(_)
                | Error::Submission(_)
                | Error::FormatMismatch { .. }
                | Error::InvalidFrame(_)
                | Error::Readback(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
