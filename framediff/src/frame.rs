use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{Error, FormatDescriptor, Result};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a captured frame.
#[derive(Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Debug, Hash)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct FrameInner {
    id: FrameId,
    format: FormatDescriptor,
    bytes_per_row: usize,
    bytes: Vec<u8>,
}

/// An immutable captured image.
///
/// Cloning is cheap and shares the pixel data; the data is released when the
/// last clone is dropped.
#[derive(Debug, Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    /// Creates a frame from tightly packed pixel rows.
    pub fn new(format: FormatDescriptor, bytes: Vec<u8>) -> Result<Self> {
        Self::with_stride(format, format.row_bytes(), bytes)
    }

    /// Creates a frame whose rows are `bytes_per_row` apart.
    pub fn with_stride(format: FormatDescriptor, bytes_per_row: usize, bytes: Vec<u8>) -> Result<Self> {
        if format.is_empty() {
            return Err(Error::InvalidFrame(format!("empty frame {}", format)));
        }
        if bytes_per_row < format.row_bytes() {
            return Err(Error::InvalidFrame(format!(
                "bytes per row {} is smaller than row size {}",
                bytes_per_row,
                format.row_bytes()
            )));
        }
        let expected = bytes_per_row * format.height as usize;
        if bytes.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "bytes length {} does not match expected size {}",
                bytes.len(),
                expected
            )));
        }

        Ok(Self {
            inner: Arc::new(FrameInner {
                id: FrameId::next(),
                format,
                bytes_per_row,
                bytes,
            }),
        })
    }

    /// Creates a frame filled with a single BGRA color.
    pub fn filled(format: FormatDescriptor, bgra: [u8; 4]) -> Result<Self> {
        let bytes = bgra
            .iter()
            .copied()
            .cycle()
            .take(format.size_in_bytes())
            .collect();
        Self::new(format, bytes)
    }

    pub fn id(&self) -> FrameId {
        self.inner.id
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.inner.format
    }

    pub fn bytes_per_row(&self) -> usize {
        self.inner.bytes_per_row
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Returns row `y` without its padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.inner.bytes_per_row;
        &self.inner.bytes[start..start + self.inner.format.row_bytes()]
    }

    /// Returns the four channel bytes of pixel `(x, y)` in memory order.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.inner.bytes_per_row + x as usize * 4;
        let p = &self.inner.bytes[offset..offset + 4];
        [p[0], p[1], p[2], p[3]]
    }

    /// Returns the pixel data with rows tightly packed.
    pub fn packed_bytes(&self) -> Cow<'_, [u8]> {
        let format = &self.inner.format;
        if self.inner.bytes_per_row == format.row_bytes() {
            // Already packed, zero-copy borrow
            return Cow::Borrowed(&self.inner.bytes);
        }

        let mut packed = Vec::with_capacity(format.size_in_bytes());
        for y in 0..format.height {
            packed.extend_from_slice(self.row(y));
        }
        Cow::Owned(packed)
    }

    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// The rolling pair of the two most recent frames.
///
/// After the first frame `previous` always holds the frame accepted
/// immediately before `current`. With a single frame accepted the window is
/// degenerate and yields nothing to render. A source that delivers the same
/// handle twice gets a pair with `previous == current`.
#[derive(Debug, Default)]
pub struct FrameWindow {
    previous: Option<Frame>,
    current: Option<Frame>,
    primed: bool,
}

impl FrameWindow {
    /// Shifts `frame` into the window.
    ///
    /// Returns the `(previous, current)` pair to render, or `None` while the
    /// window is still warming up.
    pub fn push(&mut self, frame: Frame) -> Option<(Frame, Frame)> {
        self.primed = self.current.is_some();
        self.previous = Some(self.current.take().unwrap_or_else(|| frame.clone()));
        self.current = Some(frame);
        self.pair()
    }

    pub fn pair(&self) -> Option<(Frame, Frame)> {
        match (&self.previous, &self.current) {
            (Some(previous), Some(current)) if self.primed => {
                Some((previous.clone(), current.clone()))
            }
            _ => None,
        }
    }

    pub fn previous(&self) -> Option<&Frame> {
        self.previous.as_ref()
    }

    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    /// Drops both frames; the next push starts a fresh warm-up.
    pub fn clear(&mut self) {
        self.previous = None;
        self.current = None;
        self.primed = false;
    }
}
