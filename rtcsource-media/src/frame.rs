//! Video frames and the consumer interface

use crate::buffer::PixelBuffer;
use crate::format::{Resolution, Rotation};
use std::sync::Arc;

/// Video frame representation
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Id assigned by the source on ingestion (0 before that)
    pub id: u64,
    /// Picture
    pub buffer: PixelBuffer,
    /// Capture timestamp in microseconds
    pub timestamp_us: i64,
    /// Clockwise rotation needed to display the picture upright
    pub rotation: Rotation,
}

impl VideoFrame {
    /// Create an upright frame
    pub fn new(buffer: PixelBuffer, timestamp_us: i64) -> Self {
        Self {
            id: 0,
            buffer,
            timestamp_us,
            rotation: Rotation::None,
        }
    }

    /// Set the rotation
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Picture size as stored, before rotation
    pub fn resolution(&self) -> Resolution {
        self.buffer.resolution()
    }
}

/// Frame as handed over by a capture backend
///
/// Backends may report a capture event without a picture (for example a dropped
/// hardware frame); such frames are ignored by the source.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// Picture, if the backend produced one
    pub buffer: Option<PixelBuffer>,
    /// Capture timestamp in microseconds
    pub timestamp_us: i64,
    /// Clockwise rotation needed to display the picture upright
    pub rotation: Rotation,
}

impl RawFrame {
    /// Frame carrying a picture
    pub fn new(buffer: PixelBuffer, timestamp_us: i64) -> Self {
        Self {
            buffer: Some(buffer),
            timestamp_us,
            rotation: Rotation::None,
        }
    }

    /// Capture event without a picture
    pub fn empty(timestamp_us: i64) -> Self {
        Self {
            buffer: None,
            timestamp_us,
            rotation: Rotation::None,
        }
    }

    /// Set the rotation
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Consumer of a video stream
///
/// Called from the producer context. Implementations must not block.
pub trait VideoSink: Send + Sync {
    /// A frame adapted to this sink's wants
    fn on_frame(&self, frame: &VideoFrame);

    /// A frame was dropped for this sink (framerate limiting or a failed scale)
    fn on_discarded_frame(&self);
}

/// Identity comparison for sink handles
pub(crate) fn same_sink(a: &Arc<dyn VideoSink>, b: &Arc<dyn VideoSink>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
