mod cpu;
mod gpu;
mod pipeline;

use crate::common::Result;
use crate::frame::Frame;
use crate::gpu::{Gpu, OutputTexture, Texture};

pub use pipeline::GpuDifferencePipeline;

pub const DEFAULT_DIFFERENCE_THRESHOLD: f32 = 0.1;

/// Smallest non-zero unorm8 channel value.
const MIN_CHANNEL: f32 = 1.0 / 255.0;

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Returns true for a pixel carrying the "changed" sentinel.
///
/// The sentinel is a fixed protocol between the kernel and the motion
/// evaluator: red set, green and blue both zero. Any other value means the
/// pixel did not change.
#[inline]
pub fn is_changed(bgra: [u8; 4]) -> bool {
    let [b, g, r, _] = bgra;
    g == 0 && b == 0 && r > 0
}

/// Per-pixel frame differencing.
///
/// Each output pixel depends only on the two input pixels at the same
/// position. When the luma difference exceeds `threshold` the output holds
/// the sentinel `(r = delta, g = 0, b = 0)`; otherwise it holds the current
/// luma as a grey with green and blue forced non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceKernel {
    /// Luma difference in `[0, 1]` above which a pixel counts as changed.
    pub threshold: f32,
}

impl Default for DifferenceKernel {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DIFFERENCE_THRESHOLD,
        }
    }
}

impl DifferenceKernel {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Encodes one output pixel from the previous and current BGRA pixels.
    #[inline]
    pub fn encode_pixel(&self, previous: [u8; 4], current: [u8; 4]) -> [u8; 4] {
        let luma_prev = luma(previous);
        let luma_cur = luma(current);
        let delta = (luma_cur - luma_prev).abs();

        if delta > self.threshold {
            [0, 0, to_unorm8(delta.max(MIN_CHANNEL)), 255]
        } else {
            let grey = to_unorm8(luma_cur.max(MIN_CHANNEL));
            [grey, grey, to_unorm8(luma_cur), 255]
        }
    }

    /// Runs the kernel on the CPU, writing packed BGRA rows into `output`.
    ///
    /// # Panics
    /// Panics if the frames differ in size or `output` is not sized for them.
    pub fn apply_cpu(&self, previous: &Frame, current: &Frame, output: &mut [u8]) {
        cpu::apply(self, previous, current, output);
    }

    /// Records and submits the kernel on the GPU, then schedules the copy of
    /// the result into the output's staging buffer.
    ///
    /// Returns once the work is submitted; the result is read back when the
    /// output buffer is locked.
    pub fn apply_gpu(
        &self,
        gpu: &Gpu,
        pipeline: &GpuDifferencePipeline,
        previous: &Texture,
        current: &Texture,
        output: &OutputTexture,
    ) -> Result<()> {
        gpu::apply(self, gpu, pipeline, previous, current, output)
    }
}

#[inline]
fn luma(bgra: [u8; 4]) -> f32 {
    let [b, g, r, _] = bgra;
    (LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32) / 255.0
}

#[inline]
fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: [u8; 4] = [0, 0, 0, 255];
    const WHITE: [u8; 4] = [255, 255, 255, 255];

    #[test]
    fn large_change_is_sentinel() {
        let out = DifferenceKernel::default().encode_pixel(BLACK, WHITE);
        assert!(is_changed(out));
        assert_eq!(out, [0, 0, 255, 255]);
    }

    #[test]
    fn unchanged_pixel_is_never_sentinel() {
        let kernel = DifferenceKernel::default();
        for value in [0u8, 1, 17, 128, 255] {
            let px = [value, value, value, 255];
            let out = kernel.encode_pixel(px, px);
            assert!(!is_changed(out), "value {} encoded as changed", value);
            assert!(out[0] > 0 && out[1] > 0);
        }
    }

    #[test]
    fn small_change_stays_below_threshold() {
        let kernel = DifferenceKernel::new(0.1);
        let out = kernel.encode_pixel([100, 100, 100, 255], [110, 110, 110, 255]);
        assert!(!is_changed(out));
        assert_eq!(out[2], 110);
    }

    #[test]
    fn tiny_delta_above_zero_threshold_is_still_visible() {
        let kernel = DifferenceKernel::new(0.0);
        let out = kernel.encode_pixel([100, 100, 100, 255], [101, 101, 101, 255]);
        assert!(is_changed(out));
        assert!(out[2] >= 1);
    }

    #[test]
    fn sentinel_predicate() {
        assert!(is_changed([0, 0, 1, 0]));
        assert!(!is_changed([0, 0, 0, 255]));
        assert!(!is_changed([1, 0, 200, 255]));
        assert!(!is_changed([0, 1, 200, 255]));
    }
}
