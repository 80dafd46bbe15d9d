//! # rtcsource - Observable video sources for real-time communication
//!
//! rtcsource turns capture backends into thread-safe, observable video sources. Frames
//! flow from a capturer through a per-source sink registry, where each sink gets them
//! cropped, scaled, rate limited and rotated to what it asked for.
//!
//! ## Key Features
//!
//! - **Pooled pixel buffers**: bounded reuse, lazy memoized conversion to I420
//! - **Per-sink adaptation**: resolution ladder, centered crops and framerate limiting
//! - **Explicit lifecycle**: `Initializing`, `Live`, `Muted` and `Ended` with observer events
//! - **Single-writer control**: every state change runs on the source's control queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use rtcsource::{PatternCapturer, RtcSource, SinkWants, VideoFrame, VideoSink};
//! use std::sync::Arc;
//!
//! struct Preview;
//!
//! impl VideoSink for Preview {
//!     fn on_frame(&self, frame: &VideoFrame) {
//!         println!("frame {} at {}us", frame.id, frame.timestamp_us);
//!     }
//!     fn on_discarded_frame(&self) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rtc = RtcSource::attach_current(Default::default())?;
//!     let track = rtc.local_video_track("camera", Box::new(PatternCapturer::new(3)))?;
//!
//!     let mut events = track.events();
//!     track.add_sink(Arc::new(Preview), SinkWants::default().with_max_framerate(15.0));
//!
//!     while let Some(event) = events.next().await {
//!         println!("source event: {:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use rtcsource_core::{CoreError, CoreResult, RuntimeConfig, RuntimeContext, TaskQueue};

// Re-export the media pipeline
pub use rtcsource_media::{
    AdaptOutcome, BufferLease, BufferPool, Capability, CapabilityValidator, CaptureDelegate,
    CaptureScheduler, CapturerController, ContentHint, Crop, DefaultValidator, DeviceInfo,
    DiscardReason, ErrorCategory, FrameCapturer, FrameFilter, Geometry, MediaError,
    MediaResult, MediaSource, NativeBuffer, PatternCapturer, PixelBuffer, PixelFormat,
    PoolStats, RawFrame, Resolution, Rotation, ScaleFilter, ScaleOptions, SchedulerState,
    SchedulerStats, SinkAdapter, SinkRegistry, SinkWants, SourceObserver, SourceState,
    VideoFrame, VideoOptions, VideoSink, VideoSource, VideoSourceConfig, VideoSourceStats,
    MAX_FRAMERATE,
};

// Public API modules
pub mod config;
pub mod event;
pub mod track;

// Re-export main API types
pub use config::GlobalConfig;
pub use event::{EventStream, SourceEvent};
pub use track::{LocalCapabilities, RemoteCapabilities, Track, TrackCapabilities, TrackOrigin};

use tracing::info;

/// Main entry point for rtcsource
#[derive(Debug, Clone)]
pub struct RtcSource {
    ctx: RuntimeContext,
    config: GlobalConfig,
}

impl RtcSource {
    /// Initialize with default settings and an owned runtime
    ///
    /// # Example
    /// ```rust,no_run
    /// use rtcsource::RtcSource;
    ///
    /// let rtc = RtcSource::init()?;
    /// # Ok::<(), rtcsource::MediaError>(())
    /// ```
    pub fn init() -> MediaResult<Self> {
        Self::init_with(GlobalConfig::default())
    }

    /// Initialize with custom global configuration and an owned runtime
    pub fn init_with(config: GlobalConfig) -> MediaResult<Self> {
        config.validate()?;
        let ctx = RuntimeContext::new(config.runtime.clone())?;
        Ok(Self::with_context(ctx, config))
    }

    /// Initialize on the async runtime the caller is running in
    pub fn attach_current(config: GlobalConfig) -> MediaResult<Self> {
        config.validate()?;
        let ctx = RuntimeContext::from_current(config.runtime.clone())?;
        Ok(Self::with_context(ctx, config))
    }

    fn with_context(ctx: RuntimeContext, config: GlobalConfig) -> Self {
        info!("rtcsource initialized");
        Self { ctx, config }
    }

    /// Runtime context shared by every source created here
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Global configuration
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Create a track captured by `capturer`
    ///
    /// Capture starts once the first sink is added.
    pub fn local_video_track(
        &self,
        label: &str,
        capturer: Box<dyn FrameCapturer>,
    ) -> MediaResult<Track> {
        Track::local(&self.ctx, label, self.config.video.clone(), capturer)
    }

    /// Create a track fed by frames received from a peer
    pub fn remote_video_track(&self, label: &str) -> MediaResult<Track> {
        Track::remote(&self.ctx, label, self.config.video.clone())
    }
}
