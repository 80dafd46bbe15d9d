//! # rtcsource media
//!
//! The media-source pipeline: pooled pixel buffers with lazy canonical conversion,
//! per-sink adaptation, the source lifecycle state machine, video sources with their
//! sink registry and capturer protocol, and the timer-driven capture scheduler.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod buffer;
pub mod capture;
mod convert;
pub mod error;
pub mod format;
pub mod frame;
pub mod pool;
mod scale;
pub mod scheduler;
pub mod source;
pub mod video_source;

// Re-export main types
pub use adapter::{AdaptOutcome, DiscardReason, Geometry, SinkAdapter, SinkWants};
pub use buffer::{Crop, NativeBuffer, PixelBuffer, ScaleOptions};
pub use capture::{
    Capability, CapabilityValidator, CaptureDelegate, CapturerController, DefaultValidator,
    DeviceInfo, FrameCapturer, FrameFilter, PatternCapturer, VideoOptions, MAX_FRAMERATE,
};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use format::{ContentHint, PixelFormat, Resolution, Rotation, ScaleFilter};
pub use frame::{RawFrame, VideoFrame, VideoSink};
pub use pool::{BufferLease, BufferPool, PoolStats};
pub use scheduler::{CaptureScheduler, SchedulerState, SchedulerStats};
pub use source::{MediaSource, SourceObserver, SourceState};
pub use video_source::{SinkRegistry, VideoSource, VideoSourceConfig, VideoSourceStats};
