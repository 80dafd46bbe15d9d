//! Video source: lifecycle plus sink fan-out and capturer control
//!
//! [`VideoSource`] layers a sink registry, a content hint, option/device validation and
//! the capturer request protocol on top of [`MediaSource`]. Registry changes, option
//! changes and capturer requests run on the control queue. Frames enter through
//! [`VideoSource::on_frame`] on the producer's thread and never hop to the queue.
//!
//! The capturer is held exactly while the source is active, enabled and has at least
//! one sink. Holding starts with [`CapturerController::request`], stops with
//! [`CapturerController::release`], and accepted capability changes while holding
//! issue [`CapturerController::reset`].

use crate::adapter::{AdaptOutcome, SinkAdapter, SinkWants};
use crate::buffer::ScaleOptions;
use crate::capture::{
    Capability, CapabilityValidator, CaptureDelegate, CapturerController, DefaultValidator,
    DeviceInfo, FrameFilter, VideoOptions,
};
use crate::error::{MediaError, MediaResult};
use crate::format::{ContentHint, Resolution};
use crate::frame::{same_sink, RawFrame, VideoFrame, VideoSink};
use crate::pool::BufferPool;
use crate::source::{MediaSource, SourceHooks, SourceObserver, SourceState};
use parking_lot::{Mutex, RwLock};
use rtcsource_core::RuntimeContext;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Video source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSourceConfig {
    /// Capacity of the pool used for adapted frames
    pub pool_capacity: usize,
    /// Start in [`SourceState::Live`] instead of [`SourceState::Initializing`]
    pub live_immediately: bool,
    /// Use unpooled buffers when the pool is exhausted (otherwise drop the frame)
    pub allow_unpooled_fallback: bool,
    /// Initial content hint
    pub content_hint: ContentHint,
    /// Initial capture capability
    pub capability: Capability,
}

impl VideoSourceConfig {
    /// Defaults sized from the runtime configuration
    pub fn from_runtime(config: &rtcsource_core::RuntimeConfig) -> Self {
        Self {
            pool_capacity: config.default_pool_capacity,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.pool_capacity == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "pool_capacity must be > 0".to_string(),
            });
        }
        self.capability.validate()
    }
}

impl Default for VideoSourceConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 3,
            live_immediately: false,
            allow_unpooled_fallback: true,
            content_hint: ContentHint::None,
            capability: Capability::vga(),
        }
    }
}

/// Frame counters and last observed size
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoSourceStats {
    /// Frames handed to `on_frame`
    pub frames_received: u64,
    /// Frames refused (inactive, disabled or without a picture)
    pub frames_rejected: u64,
    /// Frames routed to the filter
    pub frames_filtered: u64,
    /// Frame deliveries to sinks
    pub frames_delivered: u64,
    /// Discard signals sent to sinks
    pub frames_discarded: u64,
    /// Size of the last accepted frame, `None` before the first one
    pub last_resolution: Option<Resolution>,
    /// Registered sinks
    pub sink_count: usize,
}

struct SinkEntry {
    sink: Arc<dyn VideoSink>,
    /// `None` passes frames through untouched
    adapter: Mutex<Option<SinkAdapter>>,
}

impl SinkEntry {
    fn new(sink: Arc<dyn VideoSink>, wants: SinkWants) -> Self {
        let entry = Self {
            sink,
            adapter: Mutex::new(None),
        };
        entry.update(wants);
        entry
    }

    fn update(&self, wants: SinkWants) {
        let mut adapter = self.adapter.lock();
        if wants.is_passthrough() {
            *adapter = None;
            return;
        }
        match adapter.as_mut() {
            Some(existing) => {
                existing.update_wants(wants);
            }
            None => *adapter = Some(SinkAdapter::new(wants)),
        }
    }

    fn adapt(&self, frame: &VideoFrame, options: &ScaleOptions<'_>) -> AdaptOutcome {
        match self.adapter.lock().as_mut() {
            Some(adapter) => adapter.on_frame(frame, options),
            None => AdaptOutcome::Deliver(frame.clone()),
        }
    }
}

/// Ordered set of sinks with their adaptation state
///
/// The boolean results report the empty/non-empty edges that drive capturer control.
#[derive(Default)]
pub struct SinkRegistry {
    entries: RwLock<Vec<Arc<SinkEntry>>>,
}

impl SinkRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `sink` or replace its wants
    ///
    /// Returns `true` exactly when the registry went from empty to non-empty.
    pub fn add_or_update(&self, sink: Arc<dyn VideoSink>, wants: SinkWants) -> bool {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter().find(|e| same_sink(&e.sink, &sink)) {
            entry.update(wants);
            return false;
        }
        entries.push(Arc::new(SinkEntry::new(sink, wants)));
        entries.len() == 1
    }

    /// Remove `sink`
    ///
    /// Returns `true` exactly when the registry went from non-empty to empty. Unknown
    /// sinks are ignored.
    pub fn remove(&self, sink: &Arc<dyn VideoSink>) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !same_sink(&e.sink, sink));
        if entries.len() == before {
            trace!("{}", MediaError::UnknownSink);
            return false;
        }
        entries.is_empty()
    }

    /// Number of sinks
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no sink is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current wants of `sink`
    pub fn wants(&self, sink: &Arc<dyn VideoSink>) -> Option<SinkWants> {
        self.entries
            .read()
            .iter()
            .find(|e| same_sink(&e.sink, sink))
            .map(|e| {
                e.adapter
                    .lock()
                    .as_ref()
                    .map(|a| a.wants().clone())
                    .unwrap_or_default()
            })
    }

    fn snapshot(&self) -> Vec<Arc<SinkEntry>> {
        self.entries.read().clone()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    rejected: AtomicU64,
    filtered: AtomicU64,
    delivered: AtomicU64,
    discarded: AtomicU64,
}

/// Video source
pub struct VideoSource {
    source: MediaSource,
    weak_self: Weak<VideoSource>,
    config: VideoSourceConfig,
    pool: Arc<BufferPool>,
    sinks: SinkRegistry,
    filter: RwLock<Option<Arc<dyn FrameFilter>>>,
    content_hint: RwLock<ContentHint>,
    capability: Mutex<Capability>,
    device: Mutex<Option<DeviceInfo>>,
    validator: Arc<dyn CapabilityValidator>,
    controller: RwLock<Option<Arc<dyn CapturerController>>>,
    capturer_held: AtomicBool,
    next_frame_id: AtomicU64,
    last_resolution: Mutex<Option<Resolution>>,
    counters: Counters,
}

impl VideoSource {
    /// Create a source with the default validator
    pub fn new(ctx: &RuntimeContext, config: VideoSourceConfig) -> MediaResult<Arc<Self>> {
        Self::with_validator(ctx, config, Arc::new(DefaultValidator))
    }

    /// Create a source with a custom validator
    pub fn with_validator(
        ctx: &RuntimeContext,
        config: VideoSourceConfig,
        validator: Arc<dyn CapabilityValidator>,
    ) -> MediaResult<Arc<Self>> {
        config.validate()?;
        let source = MediaSource::new(ctx, config.live_immediately)?;

        let this = Arc::new_cyclic(|weak_self: &Weak<VideoSource>| VideoSource {
            source,
            weak_self: weak_self.clone(),
            pool: Arc::new(BufferPool::new(config.pool_capacity)),
            sinks: SinkRegistry::new(),
            filter: RwLock::new(None),
            content_hint: RwLock::new(config.content_hint),
            capability: Mutex::new(config.capability.clone()),
            device: Mutex::new(None),
            validator,
            controller: RwLock::new(None),
            capturer_held: AtomicBool::new(false),
            next_frame_id: AtomicU64::new(1),
            last_resolution: Mutex::new(None),
            counters: Counters::default(),
            config,
        });
        this.source.set_hooks(Arc::new(VideoHooks {
            video: Arc::downgrade(&this),
        }));
        info!("Video source {} created", this.source.id());
        Ok(this)
    }

    /// The underlying lifecycle state machine
    pub fn media_source(&self) -> &MediaSource {
        &self.source
    }

    /// Source id
    pub fn id(&self) -> u64 {
        self.source.id()
    }

    /// Current state
    pub fn state(&self) -> SourceState {
        self.source.state()
    }

    /// Whether the source has not ended
    pub fn is_active(&self) -> bool {
        self.source.is_active()
    }

    /// Enabled flag
    pub fn is_enabled(&self) -> bool {
        self.source.is_enabled()
    }

    /// Enable or disable; disabling releases the capturer
    pub fn set_enabled(&self, enabled: bool) {
        self.source.set_enabled(enabled);
    }

    /// End the source
    pub fn close(&self) {
        self.source.close();
    }

    /// Register an observer
    pub fn add_observer(&self, observer: Arc<dyn SourceObserver>) {
        self.source.add_observer(observer);
    }

    /// Unregister an observer
    pub fn remove_observer(&self, observer: &Arc<dyn SourceObserver>) {
        self.source.remove_observer(observer);
    }

    /// Configuration
    pub fn config(&self) -> &VideoSourceConfig {
        &self.config
    }

    /// Pool used for adapted frames
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Sink registry
    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    /// Wait until every control-queue operation issued so far has run
    pub fn flush(&self) -> MediaResult<()> {
        self.source.flush()
    }

    /// Async variant of [`VideoSource::flush`]
    pub async fn flushed(&self) -> MediaResult<()> {
        self.source.flushed().await
    }

    fn dispatch<F>(&self, task: F)
    where
        F: FnOnce(&VideoSource) + Send + 'static,
    {
        let weak = self.weak_self.clone();
        self.source.queue().dispatch(move || {
            if let Some(this) = weak.upgrade() {
                task(&this);
            }
        });
    }

    /// Register `sink` or update its wants
    pub fn add_or_update_sink(&self, sink: Arc<dyn VideoSink>, wants: SinkWants) {
        self.dispatch(move |this| {
            if this.sinks.add_or_update(sink, wants) {
                debug!("Source {} got its first sink", this.id());
                this.update_capturer();
            }
        });
    }

    /// Unregister `sink`
    pub fn remove_sink(&self, sink: &Arc<dyn VideoSink>) {
        let sink = sink.clone();
        self.dispatch(move |this| {
            if this.sinks.remove(&sink) {
                debug!("Source {} lost its last sink", this.id());
                this.update_capturer();
            }
        });
    }

    /// Route accepted frames to `filter` while it is not paused
    pub fn attach_filter(&self, filter: Arc<dyn FrameFilter>) {
        self.dispatch(move |this| {
            *this.filter.write() = Some(filter);
        });
    }

    /// Remove the filter
    pub fn detach_filter(&self) {
        self.dispatch(|this| {
            *this.filter.write() = None;
        });
    }

    /// Install the controller that runs the capturer
    pub fn set_capturer_controller(&self, controller: Arc<dyn CapturerController>) {
        self.dispatch(move |this| {
            *this.controller.write() = Some(controller);
            this.update_capturer();
        });
    }

    /// Ingest a frame from the producer
    ///
    /// Runs on the caller's thread. Accepted only while the source is active and
    /// enabled and the frame carries a picture.
    pub fn on_frame(&self, raw: RawFrame) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if !self.source.is_active() || !self.source.is_enabled() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(buffer) = raw.buffer else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let frame = VideoFrame {
            id: self.next_frame_id.fetch_add(1, Ordering::Relaxed),
            buffer,
            timestamp_us: raw.timestamp_us,
            rotation: raw.rotation,
        };
        *self.last_resolution.lock() = Some(frame.resolution());

        let filter = self.filter.read().clone();
        if let Some(filter) = filter.filter(|f| !f.is_paused()) {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            filter.on_frame(frame);
            return;
        }
        self.broadcast(&frame);
    }

    /// Hand a frame back from the filter for sink delivery
    pub fn deliver_filtered(&self, frame: VideoFrame) {
        if self.source.is_active() {
            self.broadcast(&frame);
        }
    }

    fn broadcast(&self, frame: &VideoFrame) {
        let options = ScaleOptions {
            filter: self.content_hint().scale_filter(),
            pool: Some(&self.pool),
            allow_unpooled: self.config.allow_unpooled_fallback,
        };
        for entry in self.sinks.snapshot() {
            match entry.adapt(frame, &options) {
                AdaptOutcome::Deliver(adapted) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    entry.sink.on_frame(&adapted);
                }
                AdaptOutcome::Discard(_) => {
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    entry.sink.on_discarded_frame();
                }
            }
        }
    }

    /// Current content hint
    pub fn content_hint(&self) -> ContentHint {
        *self.content_hint.read()
    }

    /// Change the content hint (drives the scaling filter)
    pub fn set_content_hint(&self, hint: ContentHint) {
        self.dispatch(move |this| {
            let mut current = this.content_hint.write();
            if *current != hint {
                debug!("Source {} content hint {:?}", this.id(), hint);
                *current = hint;
            }
        });
    }

    /// Current capture capability
    pub fn capability(&self) -> Capability {
        self.capability.lock().clone()
    }

    /// Current device
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.device.lock().clone()
    }

    /// Validate and apply new options
    ///
    /// Rejected options leave everything unchanged and notify nobody. The options are
    /// merged into whatever capability is current when the control queue applies them,
    /// so consecutive calls build on each other.
    pub fn set_options(&self, options: VideoOptions) -> MediaResult<()> {
        self.ensure_active()?;
        self.check_options(&options)?;

        self.dispatch(move |this| {
            // Earlier updates may have landed since the caller checked
            if let Err(e) = this.check_options(&options) {
                warn!("Source {} dropped options: {}", this.id(), e);
                return;
            }
            let candidate = options.apply_to(&this.capability());
            this.apply_capability(candidate);
        });
        Ok(())
    }

    /// Validate and apply a new device
    pub fn set_device_info(&self, device: DeviceInfo) -> MediaResult<()> {
        self.ensure_active()?;
        self.check_device(&device)?;

        self.dispatch(move |this| {
            if let Err(e) = this.check_device(&device) {
                warn!("Source {} dropped device {}: {}", this.id(), device.id, e);
                return;
            }
            {
                let mut current = this.device.lock();
                if current.as_ref() == Some(&device) {
                    return;
                }
                info!("Source {} switched to device {}", this.id(), device.id);
                *current = Some(device);
            }
            this.restart_capturer();
            this.source.notify_options_changed();
        });
        Ok(())
    }

    fn check_options(&self, options: &VideoOptions) -> MediaResult<()> {
        let candidate = options.apply_to(&self.capability());
        let device = self.device_info();
        self.validator
            .validate_options(&candidate, device.as_ref())
            .map_err(|reason| MediaError::ValidationRejected { reason })
    }

    fn check_device(&self, device: &DeviceInfo) -> MediaResult<()> {
        self.validator
            .validate_device(device, &self.capability())
            .map_err(|reason| MediaError::ValidationRejected { reason })
    }

    /// Size of the last accepted frame
    pub fn last_resolution(&self) -> Option<Resolution> {
        *self.last_resolution.lock()
    }

    /// Get source statistics
    pub fn stats(&self) -> VideoSourceStats {
        VideoSourceStats {
            frames_received: self.counters.received.load(Ordering::Relaxed),
            frames_rejected: self.counters.rejected.load(Ordering::Relaxed),
            frames_filtered: self.counters.filtered.load(Ordering::Relaxed),
            frames_delivered: self.counters.delivered.load(Ordering::Relaxed),
            frames_discarded: self.counters.discarded.load(Ordering::Relaxed),
            last_resolution: self.last_resolution(),
            sink_count: self.sinks.len(),
        }
    }

    /// Delegate for whatever produces this source's frames
    pub fn capture_delegate(&self) -> Arc<dyn CaptureDelegate> {
        Arc::new(SourceDelegate {
            video: self.weak_self.clone(),
        })
    }

    fn ensure_active(&self) -> MediaResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(MediaError::InvalidState {
                message: format!("Source {} has ended", self.id()),
            })
        }
    }

    // Control queue only from here on.

    fn apply_capability(&self, candidate: Capability) {
        {
            let mut current = self.capability.lock();
            if *current == candidate {
                return;
            }
            info!(
                "Source {} capability {}x{}@{}",
                self.id(),
                candidate.width,
                candidate.height,
                candidate.framerate
            );
            *current = candidate;
        }
        self.restart_capturer();
        self.source.notify_options_changed();
    }

    fn should_hold_capturer(&self) -> bool {
        self.source.is_active() && self.source.is_enabled() && !self.sinks.is_empty()
    }

    fn update_capturer(&self) {
        let should_hold = self.should_hold_capturer();
        if self.capturer_held.load(Ordering::Acquire) == should_hold {
            return;
        }
        let Some(controller) = self.controller.read().clone() else {
            return;
        };
        self.capturer_held.store(should_hold, Ordering::Release);
        if should_hold {
            debug!("Source {} requesting capturer", self.id());
            controller.request(&self.capability());
        } else {
            debug!("Source {} releasing capturer", self.id());
            controller.release();
        }
    }

    fn restart_capturer(&self) {
        if !self.capturer_held.load(Ordering::Acquire) {
            return;
        }
        if let Some(controller) = self.controller.read().clone() {
            debug!("Source {} resetting capturer", self.id());
            controller.reset(&self.capability());
        }
    }

    fn finalize(&self) {
        self.update_capturer();
        *self.filter.write() = None;
        self.sinks.clear();
        self.pool.release();
    }
}

impl std::fmt::Debug for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSource")
            .field("source", &self.source)
            .field("sinks", &self.sinks.len())
            .field("capability", &self.capability())
            .finish()
    }
}

struct VideoHooks {
    video: Weak<VideoSource>,
}

impl SourceHooks for VideoHooks {
    fn on_enabled_changed(&self, _enabled: bool) {
        if let Some(video) = self.video.upgrade() {
            video.update_capturer();
        }
    }

    fn on_finalize(&self) {
        if let Some(video) = self.video.upgrade() {
            video.finalize();
        }
    }
}

struct SourceDelegate {
    video: Weak<VideoSource>,
}

impl CaptureDelegate for SourceDelegate {
    fn on_captured_frame(&self, frame: RawFrame) {
        if let Some(video) = self.video.upgrade() {
            video.on_frame(frame);
        }
    }

    fn on_capture_started(&self) {
        if let Some(video) = self.video.upgrade() {
            video.source.change_state(SourceState::Live);
            video.source.notify_started();
        }
    }

    fn on_capture_stopped(&self) {
        if let Some(video) = self.video.upgrade() {
            video.source.change_state(SourceState::Muted);
        }
    }

    fn on_capture_failed(&self, error: &MediaError) {
        if let Some(video) = self.video.upgrade() {
            video.source.fail(error.to_string());
        }
    }
}
