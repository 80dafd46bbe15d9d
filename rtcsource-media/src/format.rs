//! Pixel formats, geometry and content hints

use serde::{Deserialize, Serialize};

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 8-bit (canonical)
    I420,
    /// Planar YUV 4:2:2, 8-bit
    I422,
    /// Planar YUV 4:4:4, 8-bit
    I444,
    /// Planar YUV 4:2:0, 10-bit in little-endian u16 samples
    I010,
    /// Planar YUV 4:2:2, 10-bit in little-endian u16 samples
    I210,
    /// Planar YUV 4:4:4, 10-bit in little-endian u16 samples
    I410,
    /// Semi-planar YUV 4:2:0 (Y plane, then interleaved UV)
    Nv12,
    /// Packed R, G, B
    Rgb24,
    /// Packed B, G, R
    Bgr24,
    /// Packed R, G, B, A
    Rgba,
    /// Packed B, G, R, A
    Bgra,
    /// Packed A, R, G, B
    Argb,
    /// Opaque handle owned by a capture backend
    Native,
}

impl PixelFormat {
    /// The format every buffer can convert to
    pub const CANONICAL: PixelFormat = PixelFormat::I420;

    /// Number of memory planes (0 for native handles)
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::I420
            | PixelFormat::I422
            | PixelFormat::I444
            | PixelFormat::I010
            | PixelFormat::I210
            | PixelFormat::I410 => 3,
            PixelFormat::Nv12 => 2,
            PixelFormat::Rgb24
            | PixelFormat::Bgr24
            | PixelFormat::Rgba
            | PixelFormat::Bgra
            | PixelFormat::Argb => 1,
            PixelFormat::Native => 0,
        }
    }

    /// Bytes per sample for planar formats, bytes per pixel for packed ones
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PixelFormat::I010 | PixelFormat::I210 | PixelFormat::I410 => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb => 4,
            _ => 1,
        }
    }

    /// Chroma subsampling as (horizontal, vertical) shifts
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            PixelFormat::I420 | PixelFormat::I010 | PixelFormat::Nv12 => (1, 1),
            PixelFormat::I422 | PixelFormat::I210 => (1, 0),
            _ => (0, 0),
        }
    }

    /// Whether this is a planar YUV format
    pub fn is_planar(&self) -> bool {
        self.plane_count() == 3
    }

    /// Whether this is a packed RGB-family format
    pub fn is_packed(&self) -> bool {
        self.plane_count() == 1
    }

    /// Whether this is a YUV format (planar or semi-planar)
    pub fn is_yuv(&self) -> bool {
        matches!(self.plane_count(), 2 | 3)
    }

    /// Whether samples are 10-bit
    pub fn is_high_bit_depth(&self) -> bool {
        matches!(
            self,
            PixelFormat::I010 | PixelFormat::I210 | PixelFormat::I410
        )
    }

    /// Rows occupied by `plane` for a picture of the given height
    pub fn plane_rows(&self, plane: usize, height: u32) -> usize {
        if plane == 0 {
            return height as usize;
        }
        let (_, y_shift) = self.chroma_shift();
        subsampled(height, y_shift) as usize
    }

    /// Minimal row length in bytes for `plane`
    pub fn min_stride(&self, plane: usize, width: u32) -> usize {
        match (self, plane) {
            (PixelFormat::Nv12, 1) => 2 * subsampled(width, 1) as usize,
            (_, 0) => width as usize * self.bytes_per_sample(),
            _ => {
                let (x_shift, _) = self.chroma_shift();
                subsampled(width, x_shift) as usize * self.bytes_per_sample()
            }
        }
    }

    /// Total bytes of a tightly packed picture
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .map(|plane| self.min_stride(plane, width) * self.plane_rows(plane, height))
            .sum()
    }
}

/// Ceiling division by `1 << shift`
pub(crate) fn subsampled(value: u32, shift: u32) -> u32 {
    value.div_ceil(1 << shift)
}

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 640x480
    pub const VGA: Self = Self::new(640, 480);
    /// 1280x720
    pub const HD: Self = Self::new(1280, 720);
    /// 1920x1080
    pub const FULL_HD: Self = Self::new(1920, 1080);

    /// Total pixel count
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width divided by height
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Clockwise rotation needed to display a frame upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    /// Upright
    #[default]
    None,
    /// 90 degrees clockwise
    Cw90,
    /// 180 degrees
    Cw180,
    /// 270 degrees clockwise
    Cw270,
}

impl Rotation {
    /// Rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Parse a multiple of 90 degrees
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    /// Whether width and height swap
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Scaling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScaleFilter {
    /// Nearest neighbor
    Nearest,
    /// Bilinear interpolation
    #[default]
    Bilinear,
    /// Area average
    Box,
}

/// What the video content is, used to steer scaling and encoder tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentHint {
    /// No hint
    #[default]
    None,
    /// Prioritize motion smoothness (camera, games)
    Motion,
    /// Prioritize detail (slides, photos)
    Detailed,
    /// Text and line art (screen sharing)
    Text,
}

impl ContentHint {
    /// Scaling filter for this kind of content
    pub fn scale_filter(&self) -> ScaleFilter {
        match self {
            ContentHint::None => ScaleFilter::Bilinear,
            ContentHint::Motion => ScaleFilter::Nearest,
            ContentHint::Detailed | ContentHint::Text => ScaleFilter::Box,
        }
    }
}
