//! Pixel buffer representation
//!
//! A [`PixelBuffer`] is an immutable, cheaply clonable handle to one picture. The
//! picture itself is a tagged union over the supported memory layouts (planar,
//! semi-planar, packed) and opaque backend handles. Plane accessors are free functions
//! over the variant, so the per-pixel hot paths never go through dynamic dispatch.
//!
//! Conversion to the canonical format (I420) is lazy and memoized per buffer: the
//! first [`PixelBuffer::to_canonical`] call converts, every later call returns the same
//! cached buffer.

use crate::convert;
use crate::error::{MediaError, MediaResult};
use crate::format::{PixelFormat, Resolution, Rotation, ScaleFilter};
use crate::pool::{BufferLease, BufferPool};
use crate::scale;
use std::any::Any;
use std::sync::{Arc, OnceLock};

/// Location of one plane inside a buffer's storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Plane {
    pub(crate) offset: usize,
    pub(crate) stride: usize,
    pub(crate) len: usize,
}

/// Tightly packed plane layout and total size for a picture
pub(crate) fn tight_layout(format: PixelFormat, width: u32, height: u32) -> ([Plane; 3], usize) {
    let strides: Vec<usize> = (0..format.plane_count())
        .map(|plane| format.min_stride(plane, width))
        .collect();
    strided_layout(format, height, &strides)
}

fn strided_layout(format: PixelFormat, height: u32, strides: &[usize]) -> ([Plane; 3], usize) {
    let mut planes = [Plane::default(); 3];
    let mut offset = 0;
    for (plane, stride) in strides.iter().enumerate().take(format.plane_count()) {
        let len = stride * format.plane_rows(plane, height);
        planes[plane] = Plane {
            offset,
            stride: *stride,
            len,
        };
        offset += len;
    }
    (planes, offset)
}

/// Picture memory owned by a capture backend (GPU surface, OS capture buffer, ...)
pub trait NativeBuffer: Send + Sync + 'static {
    /// Width in pixels
    fn width(&self) -> u32;

    /// Height in pixels
    fn height(&self) -> u32;

    /// Copy the pixels into CPU memory
    ///
    /// Any memory format is accepted; the result is converted further as needed.
    fn to_memory(&self) -> MediaResult<PixelBuffer>;

    /// Downcasting hook for the backend that produced the buffer
    fn as_any(&self) -> &dyn Any;
}

/// Source rectangle for crop-and-scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Crop {
    /// Create a crop rectangle
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whole-picture crop
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Allocation and filtering policy for derived buffers
#[derive(Clone, Copy)]
pub struct ScaleOptions<'a> {
    /// Filter used when resampling
    pub filter: ScaleFilter,
    /// Pool to allocate output from
    pub pool: Option<&'a BufferPool>,
    /// Whether an exhausted pool may fall back to an unpooled allocation
    pub allow_unpooled: bool,
}

impl<'a> ScaleOptions<'a> {
    /// Unpooled output with the given filter
    pub fn unpooled(filter: ScaleFilter) -> Self {
        Self {
            filter,
            pool: None,
            allow_unpooled: true,
        }
    }

    /// Pooled output with an unpooled fallback
    pub fn pooled(filter: ScaleFilter, pool: &'a BufferPool) -> Self {
        Self {
            filter,
            pool: Some(pool),
            allow_unpooled: true,
        }
    }

    pub(crate) fn allocate(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> MediaResult<BufferLease> {
        match self.pool {
            Some(pool) if self.allow_unpooled => pool.acquire_or_unpooled(width, height, format),
            Some(pool) => pool.acquire(width, height, format),
            None => BufferLease::unpooled(format, width, height),
        }
    }
}

impl Default for ScaleOptions<'_> {
    fn default() -> Self {
        Self::unpooled(ScaleFilter::default())
    }
}

impl std::fmt::Debug for ScaleOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleOptions")
            .field("filter", &self.filter)
            .field("pooled", &self.pool.is_some())
            .field("allow_unpooled", &self.allow_unpooled)
            .finish()
    }
}

/// Immutable shared picture
#[derive(Clone)]
pub struct PixelBuffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    width: u32,
    height: u32,
    repr: BufferRepr,
    canonical: OnceLock<PixelBuffer>,
}

enum BufferRepr {
    /// I420, I422, I444 and their 10-bit variants
    Planar { lease: BufferLease },
    /// NV12
    SemiPlanar { lease: BufferLease },
    /// RGB family, one plane
    Packed { lease: BufferLease },
    /// Backend-owned handle
    Native(Arc<dyn NativeBuffer>),
}

fn repr_lease(repr: &BufferRepr) -> Option<&BufferLease> {
    match repr {
        BufferRepr::Planar { lease }
        | BufferRepr::SemiPlanar { lease }
        | BufferRepr::Packed { lease } => Some(lease),
        BufferRepr::Native(_) => None,
    }
}

fn repr_format(repr: &BufferRepr) -> PixelFormat {
    repr_lease(repr)
        .map(|lease| lease.format())
        .unwrap_or(PixelFormat::Native)
}

fn repr_stride(repr: &BufferRepr, plane: usize) -> usize {
    repr_lease(repr).map(|lease| lease.stride(plane)).unwrap_or(0)
}

fn repr_data(repr: &BufferRepr, plane: usize) -> &[u8] {
    match repr_lease(repr) {
        Some(lease) => lease.plane(plane),
        None => &[],
    }
}

impl PixelBuffer {
    /// Wrap tightly packed bytes
    pub fn from_vec(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> MediaResult<Self> {
        let strides: Vec<usize> = (0..format.plane_count())
            .map(|plane| format.min_stride(plane, width))
            .collect();
        Self::with_strides(format, width, height, &strides, data)
    }

    /// Wrap bytes whose planes follow each other with the given row strides
    pub fn with_strides(
        format: PixelFormat,
        width: u32,
        height: u32,
        strides: &[usize],
        data: Vec<u8>,
    ) -> MediaResult<Self> {
        if format == PixelFormat::Native {
            return Err(MediaError::UnsupportedFormat {
                format: "use PixelBuffer::native for backend handles".to_string(),
            });
        }
        if width == 0 || height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("Invalid buffer dimensions {}x{}", width, height),
            });
        }
        if strides.len() != format.plane_count() {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "{:?} needs {} strides, got {}",
                    format,
                    format.plane_count(),
                    strides.len()
                ),
            });
        }
        for (plane, stride) in strides.iter().enumerate() {
            let min = format.min_stride(plane, width);
            if *stride < min {
                return Err(MediaError::InvalidConfiguration {
                    message: format!("Stride {} of plane {} is below {}", stride, plane, min),
                });
            }
        }

        let (planes, size) = strided_layout(format, height, strides);
        if data.len() < size {
            return Err(MediaError::InvalidFrameData {
                expected: size,
                actual: data.len(),
            });
        }
        Ok(Self::from_lease(BufferLease::from_parts(
            format, width, height, planes, data,
        )))
    }

    /// Wrap a backend-owned handle
    pub fn native(buffer: Arc<dyn NativeBuffer>) -> Self {
        Self::from_repr(buffer.width(), buffer.height(), BufferRepr::Native(buffer))
    }

    pub(crate) fn from_lease(lease: BufferLease) -> Self {
        let (width, height) = (lease.width(), lease.height());
        let repr = match lease.format().plane_count() {
            3 => BufferRepr::Planar { lease },
            2 => BufferRepr::SemiPlanar { lease },
            _ => BufferRepr::Packed { lease },
        };
        Self::from_repr(width, height, repr)
    }

    fn from_repr(width: u32, height: u32, repr: BufferRepr) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                width,
                height,
                repr,
                canonical: OnceLock::new(),
            }),
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.inner.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Picture size
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.inner.width, self.inner.height)
    }

    /// Pixel format tag
    pub fn format(&self) -> PixelFormat {
        repr_format(&self.inner.repr)
    }

    /// Row length of `plane` in bytes
    pub fn stride(&self, plane: usize) -> usize {
        repr_stride(&self.inner.repr, plane)
    }

    /// Bytes of `plane` (empty for native buffers)
    pub fn data(&self, plane: usize) -> &[u8] {
        repr_data(&self.inner.repr, plane)
    }

    /// Size of `plane` in bytes
    pub fn byte_size(&self, plane: usize) -> usize {
        self.data(plane).len()
    }

    /// Whether this wraps a backend handle
    pub fn is_native(&self) -> bool {
        matches!(self.inner.repr, BufferRepr::Native(_))
    }

    /// Backend handle, if any
    pub fn native_handle(&self) -> Option<&Arc<dyn NativeBuffer>> {
        match &self.inner.repr {
            BufferRepr::Native(native) => Some(native),
            _ => None,
        }
    }

    /// Pool slot backing this buffer
    pub fn pool_slot(&self) -> Option<u64> {
        repr_lease(&self.inner.repr).and_then(|lease| lease.slot_id())
    }

    /// Whether two handles refer to the same picture
    pub fn ptr_eq(a: &PixelBuffer, b: &PixelBuffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// The picture as I420, converted at most once per buffer
    pub fn to_canonical(&self) -> MediaResult<PixelBuffer> {
        if self.format() == PixelFormat::CANONICAL {
            return Ok(self.clone());
        }
        if let Some(cached) = self.inner.canonical.get() {
            return Ok(cached.clone());
        }

        let converted = match &self.inner.repr {
            BufferRepr::Native(native) => {
                let memory = native.to_memory()?;
                if memory.is_native() {
                    return Err(MediaError::NativeBuffer {
                        message: "to_memory returned another native buffer".to_string(),
                    });
                }
                memory.to_canonical()?
            }
            _ => convert::to_i420(self)?,
        };
        // Under a race the first stored result wins and every caller sees it.
        Ok(self.inner.canonical.get_or_init(|| converted).clone())
    }

    /// Crop and scale with a bilinear filter into an unpooled buffer
    pub fn crop_and_scale(
        &self,
        crop: Crop,
        out_width: u32,
        out_height: u32,
    ) -> MediaResult<PixelBuffer> {
        self.crop_and_scale_with(
            crop,
            Resolution::new(out_width, out_height),
            &ScaleOptions::default(),
        )
    }

    /// Crop `crop` out of the picture and scale it to `output`
    ///
    /// I420, NV12 and packed RGB buffers are scaled in their own format. Everything
    /// else goes through [`PixelBuffer::to_canonical`] first and yields I420.
    pub fn crop_and_scale_with(
        &self,
        crop: Crop,
        output: Resolution,
        options: &ScaleOptions<'_>,
    ) -> MediaResult<PixelBuffer> {
        self.check_crop(crop)?;
        if output.width == 0 || output.height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("Invalid output size {}x{}", output.width, output.height),
            });
        }

        let format = self.format();
        match format {
            PixelFormat::I420 | PixelFormat::Nv12 => {
                let mut lease = options.allocate(format, output.width, output.height)?;
                scale::scale_yuv420(self, crop, &mut lease, options.filter);
                Ok(lease.freeze())
            }
            f if f.is_packed() => {
                let mut lease = options.allocate(format, output.width, output.height)?;
                scale::scale_packed(self, crop, &mut lease, options.filter);
                Ok(lease.freeze())
            }
            _ => self
                .to_canonical()?
                .crop_and_scale_with(crop, output, options),
        }
    }

    /// Rotate to upright, producing I420 (returns `self` for [`Rotation::None`])
    pub fn rotate(&self, rotation: Rotation, options: &ScaleOptions<'_>) -> MediaResult<PixelBuffer> {
        if rotation == Rotation::None {
            return Ok(self.clone());
        }
        let source = self.to_canonical()?;
        let (width, height) = if rotation.swaps_dimensions() {
            (source.height(), source.width())
        } else {
            (source.width(), source.height())
        };
        let mut lease = options.allocate(PixelFormat::I420, width, height)?;
        scale::rotate_i420(&source, &mut lease, rotation);
        Ok(lease.freeze())
    }

    fn check_crop(&self, crop: Crop) -> MediaResult<()> {
        let fits_x = crop.x.checked_add(crop.width).is_some_and(|r| r <= self.width());
        let fits_y = crop.y.checked_add(crop.height).is_some_and(|b| b <= self.height());
        if crop.width == 0 || crop.height == 0 || !fits_x || !fits_y {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "Crop {:?} outside {}x{} picture",
                    crop,
                    self.width(),
                    self.height()
                ),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.format())
            .field("pool_slot", &self.pool_slot())
            .field("canonical_cached", &self.inner.canonical.get().is_some())
            .finish()
    }
}
