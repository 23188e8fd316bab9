use crate::common::Result;
use crate::kernel::is_changed;
use crate::pool::{BufferReadGuard, PooledBuffer};

pub const DEFAULT_MOTION_THRESHOLD: usize = 100;
pub const DEFAULT_SAMPLE_STRIDE: usize = 2;

/// The sampled pixel that pushed the count over the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvidence {
    pub x: u32,
    pub y: u32,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectionResult {
    pub detected: bool,
    pub evidence: Option<MotionEvidence>,
    /// Sentinel pixels counted before the scan stopped.
    pub changed_samples: usize,
    pub samples_scanned: usize,
}

/// Decides whether a filtered frame shows motion by sampling it on a grid
/// and counting "changed" sentinel pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvaluator {
    /// Motion is reported once strictly more samples than this are changed.
    pub threshold: usize,
    pub stride: usize,
}

impl Default for MotionEvaluator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MOTION_THRESHOLD,
            stride: DEFAULT_SAMPLE_STRIDE,
        }
    }
}

impl MotionEvaluator {
    pub fn new(threshold: usize, stride: usize) -> Self {
        debug_assert!(stride > 0, "sample stride must be positive");
        Self { threshold, stride }
    }

    /// Locks `buffer` for the duration of the scan.
    pub fn detect(&self, buffer: &PooledBuffer) -> Result<DetectionResult> {
        let guard = buffer.lock()?;
        Ok(self.scan(&guard))
    }

    /// Scans rows and columns `0, stride, 2 * stride, ..` short of the last
    /// row and column, stopping at the first sample past the threshold.
    pub fn scan(&self, pixels: &BufferReadGuard<'_>) -> DetectionResult {
        let format = pixels.format();
        let stride = self.stride.max(1);
        let mut result = DetectionResult::default();

        for y in (0..format.height.saturating_sub(1)).step_by(stride) {
            for x in (0..format.width.saturating_sub(1)).step_by(stride) {
                result.samples_scanned += 1;

                let px = pixels.pixel(x, y);
                if !is_changed(px) {
                    continue;
                }

                result.changed_samples += 1;
                if result.changed_samples > self.threshold {
                    let [blue, green, red, _] = px;
                    result.detected = true;
                    result.evidence = Some(MotionEvidence {
                        x,
                        y,
                        red,
                        green,
                        blue,
                    });
                    return result;
                }
            }
        }

        result
    }
}
