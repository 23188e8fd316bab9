use serde::{Deserialize, Serialize};

/// Byte order of the four 8-bit channels of a pixel.
#[derive(Debug, Hash, PartialEq, Eq, Copy, Clone, Default, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Blue, green, red, alpha. The layout the capture output is configured for.
    #[default]
    Bgra8,
    Rgba8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Bgra8 | PixelLayout::Rgba8 => 4,
        }
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelLayout::Bgra8 => write!(f, "BGRA8"),
            PixelLayout::Rgba8 => write!(f, "RGBA8"),
        }
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Copy, Clone, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Rec709,
    Unknown,
}

impl std::fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorSpace::Srgb => write!(f, "sRGB"),
            ColorSpace::Rec709 => write!(f, "Rec.709"),
            ColorSpace::Unknown => write!(f, "unknown"),
        }
    }
}

/// Describes the geometry and encoding of a frame or output buffer.
///
/// Two frames can be differenced only when their descriptors are equal.
/// Any change of descriptor forces the renderer to rebuild its pool.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub color_space: ColorSpace,
}

impl FormatDescriptor {
    pub fn new(width: u32, height: u32, layout: PixelLayout, color_space: ColorSpace) -> Self {
        Self {
            width,
            height,
            layout,
            color_space,
        }
    }

    /// A BGRA8 sRGB descriptor, the capture default.
    pub fn bgra(width: u32, height: u32) -> Self {
        Self::new(width, height, PixelLayout::Bgra8, ColorSpace::Srgb)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.layout.bytes_per_pixel()
    }

    /// Bytes per row without padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.height as usize * self.row_bytes()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn with_layout(self, layout: PixelLayout) -> Self {
        Self { layout, ..self }
    }
}

impl std::fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {} {}",
            self.width, self.height, self.layout, self.color_space
        )
    }
}
