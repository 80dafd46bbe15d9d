//! Track management
//!
//! A [`Track`] is one concrete type for every video track. What differs between a
//! track fed by a local capturer and one fed by frames from the network lives in the
//! [`TrackCapabilities`] strategy picked at construction.

use crate::event::EventStream;
use rtcsource_core::RuntimeContext;
use rtcsource_media::{
    CaptureScheduler, ContentHint, FrameCapturer, MediaError, MediaResult, RawFrame,
    SinkWants, SourceState, VideoOptions, VideoSink, VideoSource, VideoSourceConfig,
    VideoSourceStats,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a track's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOrigin {
    /// Captured on this device
    Local,
    /// Received from a remote peer
    Remote,
}

impl std::fmt::Display for TrackOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackOrigin::Local => write!(f, "local"),
            TrackOrigin::Remote => write!(f, "remote"),
        }
    }
}

/// Operations whose behavior depends on the track's origin
pub trait TrackCapabilities: Send + Sync {
    /// Origin this strategy implements
    fn origin(&self) -> TrackOrigin;

    /// Stop or resume frame flow
    fn set_muted(&self, source: &VideoSource, muted: bool) {
        source.set_enabled(!muted);
    }

    /// Change capture parameters
    fn set_options(&self, source: &VideoSource, options: VideoOptions) -> MediaResult<()>;

    /// Inject a frame produced outside the track
    fn push_frame(&self, source: &VideoSource, frame: RawFrame) -> MediaResult<()>;

    /// Scheduler pumping a local capturer
    fn scheduler(&self) -> Option<&CaptureScheduler> {
        None
    }
}

/// Capabilities of a track driven by a local capturer
pub struct LocalCapabilities {
    scheduler: CaptureScheduler,
}

impl TrackCapabilities for LocalCapabilities {
    fn origin(&self) -> TrackOrigin {
        TrackOrigin::Local
    }

    fn set_options(&self, source: &VideoSource, options: VideoOptions) -> MediaResult<()> {
        source.set_options(options)
    }

    fn push_frame(&self, _source: &VideoSource, _frame: RawFrame) -> MediaResult<()> {
        Err(MediaError::InvalidState {
            message: "Local tracks are fed by their capturer".to_string(),
        })
    }

    fn scheduler(&self) -> Option<&CaptureScheduler> {
        Some(&self.scheduler)
    }
}

/// Capabilities of a track fed by frames from the network
#[derive(Debug, Default)]
pub struct RemoteCapabilities;

impl TrackCapabilities for RemoteCapabilities {
    fn origin(&self) -> TrackOrigin {
        TrackOrigin::Remote
    }

    fn set_options(&self, _source: &VideoSource, _options: VideoOptions) -> MediaResult<()> {
        Err(MediaError::InvalidState {
            message: "Capture options of a remote track belong to the sender".to_string(),
        })
    }

    fn push_frame(&self, source: &VideoSource, frame: RawFrame) -> MediaResult<()> {
        source.on_frame(frame);
        Ok(())
    }
}

/// Video track
pub struct Track {
    id: String,
    label: String,
    source: Arc<VideoSource>,
    capabilities: Box<dyn TrackCapabilities>,
    muted: AtomicBool,
    created_at: Instant,
}

impl Track {
    /// Create a track captured by `capturer`
    pub fn local(
        ctx: &RuntimeContext,
        label: impl Into<String>,
        config: VideoSourceConfig,
        capturer: Box<dyn FrameCapturer>,
    ) -> MediaResult<Self> {
        let source = VideoSource::new(ctx, config)?;
        let scheduler = CaptureScheduler::attach(ctx, capturer, &source);
        Ok(Self::with_capabilities(
            label.into(),
            source,
            Box::new(LocalCapabilities { scheduler }),
        ))
    }

    /// Create a track fed through [`Track::push_frame`]
    ///
    /// Remote tracks are live from the start.
    pub fn remote(
        ctx: &RuntimeContext,
        label: impl Into<String>,
        config: VideoSourceConfig,
    ) -> MediaResult<Self> {
        let config = VideoSourceConfig {
            live_immediately: true,
            ..config
        };
        let source = VideoSource::new(ctx, config)?;
        Ok(Self::with_capabilities(
            label.into(),
            source,
            Box::new(RemoteCapabilities),
        ))
    }

    fn with_capabilities(
        label: String,
        source: Arc<VideoSource>,
        capabilities: Box<dyn TrackCapabilities>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        info!(
            "📹 Creating {} video track: {} ({})",
            capabilities.origin(),
            id,
            label
        );
        Self {
            id,
            label,
            source,
            capabilities,
            muted: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get track label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get track origin
    pub fn origin(&self) -> TrackOrigin {
        self.capabilities.origin()
    }

    /// Underlying video source
    pub fn source(&self) -> &Arc<VideoSource> {
        &self.source
    }

    /// Capture scheduler of a local track
    pub fn scheduler(&self) -> Option<&CaptureScheduler> {
        self.capabilities.scheduler()
    }

    /// Source state
    pub fn state(&self) -> SourceState {
        self.source.state()
    }

    /// Whether the track has ended
    pub fn is_ended(&self) -> bool {
        !self.source.is_active()
    }

    /// Check if track is muted
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Mute the track
    pub fn mute(&self) {
        if !self.muted.swap(true, Ordering::AcqRel) {
            info!("🔇 Muting track: {}", self.id);
            self.capabilities.set_muted(&self.source, true);
        }
    }

    /// Unmute the track
    pub fn unmute(&self) {
        if self.muted.swap(false, Ordering::AcqRel) {
            info!("🔊 Unmuting track: {}", self.id);
            self.capabilities.set_muted(&self.source, false);
        }
    }

    /// Toggle mute state
    pub fn toggle_mute(&self) {
        if self.is_muted() {
            self.unmute();
        } else {
            self.mute();
        }
    }

    /// Attach a sink, or update its wants
    pub fn add_sink(&self, sink: Arc<dyn VideoSink>, wants: SinkWants) {
        debug!("Track {} sink wants {:?}", self.id, wants);
        self.source.add_or_update_sink(sink, wants);
    }

    /// Detach a sink
    pub fn remove_sink(&self, sink: &Arc<dyn VideoSink>) {
        self.source.remove_sink(sink);
    }

    /// Change capture parameters
    pub fn set_options(&self, options: VideoOptions) -> MediaResult<()> {
        debug!("⚙️ Updating track {} options", self.id);
        self.capabilities.set_options(&self.source, options)
    }

    /// Change the content hint
    pub fn set_content_hint(&self, hint: ContentHint) {
        self.source.set_content_hint(hint);
    }

    /// Inject a frame (remote tracks only)
    pub fn push_frame(&self, frame: RawFrame) -> MediaResult<()> {
        self.capabilities.push_frame(&self.source, frame)
    }

    /// Subscribe to source events
    pub fn events(&self) -> EventStream {
        EventStream::subscribe(&self.source)
    }

    /// End the track
    pub fn stop(&self) {
        info!("Stopping track: {}", self.id);
        self.source.close();
    }

    /// Get track statistics
    pub fn stats(&self) -> VideoSourceStats {
        self.source.stats()
    }

    /// Get creation time
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Wait until queued control operations have run
    pub async fn settled(&self) -> MediaResult<()> {
        self.source.flushed().await
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("origin", &self.origin())
            .field("muted", &self.is_muted())
            .field("source", &self.source)
            .finish()
    }
}
