//! Per-sink resolution, framerate and rotation adaptation
//!
//! Each registered sink gets its own [`SinkAdapter`]. For every broadcast frame the
//! adapter decides whether the sink should see it at all (framerate limit), then
//! computes a centered crop and an output size and delivers either the original buffer
//! (when nothing changes) or a scaled copy.
//!
//! Output sizes follow a fixed ladder of scale factors (alternating 3/4 and 2/3, so
//! 1, 3/4, 1/2, 3/8, 1/4, ...). The first step whose pixel count fits under
//! `max_pixel_count` is used.

use crate::buffer::{Crop, ScaleOptions};
use crate::format::{Resolution, Rotation};
use crate::frame::VideoFrame;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// What a sink wants from the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkWants {
    /// Upper bound on output pixels per frame
    pub max_pixel_count: Option<u64>,
    /// Upper bound on delivered frames per second
    pub max_framerate: Option<f64>,
    /// Deliver upright pictures instead of rotation metadata
    pub rotation_applied: bool,
    /// Crop to this aspect ratio (width, height) before scaling
    pub crop_aspect: Option<(u32, u32)>,
    /// Output width and height are multiples of this
    pub alignment: u32,
}

impl SinkWants {
    /// Limit output pixel count
    pub fn with_max_pixel_count(mut self, pixels: u64) -> Self {
        self.max_pixel_count = Some(pixels);
        self
    }

    /// Limit output framerate
    pub fn with_max_framerate(mut self, fps: f64) -> Self {
        self.max_framerate = Some(fps);
        self
    }

    /// Request upright pictures
    pub fn with_rotation_applied(mut self) -> Self {
        self.rotation_applied = true;
        self
    }

    /// Request a centered crop to `width:height`
    pub fn with_crop_aspect(mut self, width: u32, height: u32) -> Self {
        self.crop_aspect = Some((width, height));
        self
    }

    /// Require output dimensions to be multiples of `alignment`
    pub fn with_alignment(mut self, alignment: u32) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    /// Whether these wants never change a frame
    pub fn is_passthrough(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for SinkWants {
    fn default() -> Self {
        Self {
            max_pixel_count: None,
            max_framerate: None,
            rotation_applied: false,
            crop_aspect: None,
            alignment: 1,
        }
    }
}

/// Why a frame was not delivered
#[derive(Debug, Clone, PartialEq)]
pub enum DiscardReason {
    /// Over the sink's framerate limit
    Framerate,
    /// Cropping, scaling or rotating failed
    Adaptation(String),
}

/// Result of adapting one frame
#[derive(Debug, Clone)]
pub enum AdaptOutcome {
    /// Frame for the sink
    Deliver(VideoFrame),
    /// Nothing for the sink this time; it gets a discard signal
    Discard(DiscardReason),
}

/// Crop and output size for one input size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Source rectangle
    pub crop: Crop,
    /// Output size
    pub output: Resolution,
}

impl Geometry {
    /// Whether the frame passes unchanged
    pub fn is_identity(&self, input: Resolution) -> bool {
        self.crop == Crop::full(input.width, input.height) && self.output == input
    }
}

/// Keep/drop decision for a maximum framerate
///
/// Tracks the timestamp the next frame is due at. Frames arriving before it are
/// dropped; a timestamp far from it (source restart, clock jump) resets the tracker.
#[derive(Debug, Clone, Default)]
struct FramerateLimiter {
    max_framerate: Option<f64>,
    next_frame_us: Option<i64>,
}

impl FramerateLimiter {
    fn set_max_framerate(&mut self, max_framerate: Option<f64>) {
        if self.max_framerate != max_framerate {
            self.max_framerate = max_framerate;
            self.next_frame_us = None;
        }
    }

    fn should_drop(&mut self, timestamp_us: i64) -> bool {
        let Some(fps) = self.max_framerate else {
            return false;
        };
        if !fps.is_finite() || fps <= 0.0 {
            return true;
        }
        let interval_us = (1_000_000.0 / fps) as i64;
        if interval_us <= 0 {
            return false;
        }

        if let Some(next) = self.next_frame_us {
            let until_next = next - timestamp_us;
            if until_next.abs() < 2 * interval_us {
                if until_next > 0 {
                    return true;
                }
                self.next_frame_us = Some(next + interval_us);
                return false;
            }
        }
        // First frame or a jump: aim half an interval ahead to tolerate jitter.
        self.next_frame_us = Some(timestamp_us + interval_us / 2);
        false
    }
}

/// Per-sink adaptation state
#[derive(Debug, Clone, Default)]
pub struct SinkAdapter {
    wants: SinkWants,
    limiter: FramerateLimiter,
}

impl SinkAdapter {
    /// Create an adapter for `wants`
    pub fn new(wants: SinkWants) -> Self {
        let mut adapter = Self::default();
        adapter.update_wants(wants);
        adapter
    }

    /// Current wants
    pub fn wants(&self) -> &SinkWants {
        &self.wants
    }

    /// Replace the wants; returns whether anything changed
    pub fn update_wants(&mut self, wants: SinkWants) -> bool {
        if self.wants == wants {
            return false;
        }
        self.limiter.set_max_framerate(wants.max_framerate);
        self.wants = wants;
        true
    }

    /// Crop and output size for a picture of size `input`
    pub fn geometry(&self, input: Resolution, even_crop: bool) -> Geometry {
        let crop = centered_crop(input, self.wants.crop_aspect, even_crop);
        let cropped = Resolution::new(crop.width, crop.height);
        let mut output = match self.wants.max_pixel_count {
            Some(max) => scaled_size(cropped, max),
            None => cropped,
        };
        let alignment = self.wants.alignment.max(1);
        if alignment > 1 {
            output.width = align_down(output.width, alignment);
            output.height = align_down(output.height, alignment);
        }
        Geometry { crop, output }
    }

    /// Adapt `frame` for this sink
    ///
    /// Never blocks; pool exhaustion without fallback turns into a discard.
    pub fn on_frame(&mut self, frame: &VideoFrame, options: &ScaleOptions<'_>) -> AdaptOutcome {
        if self.limiter.should_drop(frame.timestamp_us) {
            trace!("Frame {} dropped by framerate limit", frame.id);
            return AdaptOutcome::Discard(DiscardReason::Framerate);
        }

        let input = frame.resolution();
        let geometry = self.geometry(input, frame.buffer.format().is_yuv());
        let buffer = if geometry.is_identity(input) {
            frame.buffer.clone()
        } else {
            match frame
                .buffer
                .crop_and_scale_with(geometry.crop, geometry.output, options)
            {
                Ok(buffer) => buffer,
                Err(e) => {
                    trace!("Frame {} dropped: {}", frame.id, e);
                    return AdaptOutcome::Discard(DiscardReason::Adaptation(e.to_string()));
                }
            }
        };

        let (buffer, rotation) = if self.wants.rotation_applied && frame.rotation != Rotation::None {
            match buffer.rotate(frame.rotation, options) {
                Ok(rotated) => (rotated, Rotation::None),
                Err(e) => {
                    trace!("Frame {} dropped: {}", frame.id, e);
                    return AdaptOutcome::Discard(DiscardReason::Adaptation(e.to_string()));
                }
            }
        } else {
            (buffer, frame.rotation)
        };

        AdaptOutcome::Deliver(VideoFrame {
            id: frame.id,
            buffer,
            timestamp_us: frame.timestamp_us,
            rotation,
        })
    }
}

/// Largest centered rectangle with `aspect`, offset `(input - crop) / 2`
fn centered_crop(input: Resolution, aspect: Option<(u32, u32)>, even: bool) -> Crop {
    let (mut width, mut height) = (input.width, input.height);
    if let Some((aw, ah)) = aspect.filter(|&(w, h)| w > 0 && h > 0) {
        let wide = input.width as u64 * ah as u64;
        let tall = input.height as u64 * aw as u64;
        if wide > tall {
            width = (tall / ah as u64) as u32;
        } else if tall > wide {
            height = (wide / aw as u64) as u32;
        }
    }
    if even && (width, height) != (input.width, input.height) {
        width = even_floor(width);
        height = even_floor(height);
    }
    let width = width.clamp(1, input.width);
    let height = height.clamp(1, input.height);

    let mut x = (input.width - width) / 2;
    let mut y = (input.height - height) / 2;
    if even {
        x &= !1;
        y &= !1;
    }
    Crop::new(x, y, width, height)
}

fn even_floor(value: u32) -> u32 {
    if value >= 2 {
        value & !1
    } else {
        value
    }
}

fn align_down(value: u32, alignment: u32) -> u32 {
    match value / alignment * alignment {
        0 => value,
        aligned => aligned,
    }
}

/// Scale factor as a fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fraction {
    numerator: u64,
    denominator: u64,
}

impl Fraction {
    fn times(&self, numerator: u64, denominator: u64) -> Self {
        let numerator = self.numerator * numerator;
        let denominator = self.denominator * denominator;
        let divisor = gcd(numerator, denominator);
        Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    fn apply(&self, value: u32) -> u32 {
        ((value as u64 * self.numerator) / self.denominator) as u32
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// First step of the 3/4, 2/3 ladder whose output fits under `max_pixel_count`
fn scaled_size(input: Resolution, max_pixel_count: u64) -> Resolution {
    let mut scale = Fraction {
        numerator: 1,
        denominator: 1,
    };
    let mut three_quarters = true;
    let pixels = |s: &Fraction| s.apply(input.width) as u64 * s.apply(input.height) as u64;

    while pixels(&scale) > max_pixel_count {
        let next = if three_quarters {
            scale.times(3, 4)
        } else {
            scale.times(2, 3)
        };
        if next.apply(input.width) == 0 || next.apply(input.height) == 0 {
            break;
        }
        scale = next;
        three_quarters = !three_quarters;
    }
    Resolution::new(scale.apply(input.width), scale.apply(input.height))
}
