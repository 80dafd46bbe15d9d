//! Timer-driven capture pump
//!
//! [`CaptureScheduler`] owns a [`FrameCapturer`] and calls it at the target framerate
//! from a task on the context's async runtime. Results go to a [`CaptureDelegate`],
//! always outside the scheduler's lock, so delegates may call back into the scheduler.
//!
//! Every arm of the timer bumps a generation counter. A tick from an older generation
//! is a no-op, which makes `stop` and rearming take effect immediately even if a tick
//! is already queued.

use crate::capture::{Capability, CaptureDelegate, CapturerController, FrameCapturer};
use crate::error::MediaError;
use crate::frame::RawFrame;
use crate::video_source::VideoSource;
use parking_lot::Mutex;
use rtcsource_core::RuntimeContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Not capturing
    Stopped,
    /// Capturer started, no frame yet
    Starting,
    /// Frames are flowing
    Started,
    /// Shutting the capturer down
    Stopping,
}

impl SchedulerState {
    fn is_running(self) -> bool {
        matches!(self, SchedulerState::Starting | SchedulerState::Started)
    }
}

/// Statistics about capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Successful starts
    pub starts: u64,
    /// Pictures delivered
    pub frames_captured: u64,
    /// Ticks where the capturer had nothing
    pub empty_captures: u64,
    /// Frames lost to transient errors
    pub transient_errors: u64,
}

/// Capture pump
#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    handle: Handle,
    delegate: Arc<dyn CaptureDelegate>,
    epoch: Instant,
    core: Mutex<SchedulerCore>,
}

struct SchedulerCore {
    state: SchedulerState,
    capability: Capability,
    capturer: Box<dyn FrameCapturer>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    stats: SchedulerStats,
}

impl SchedulerCore {
    fn can_start(&self) -> bool {
        self.capability.framerate.is_finite()
            && self.capability.framerate > 0.0
            && self.capturer.has_source()
    }

    fn disarm(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Stop the capturer; returns whether it was running
    fn halt(&mut self) -> bool {
        self.disarm();
        let was_running = self.state.is_running();
        if was_running {
            self.state = SchedulerState::Stopping;
            self.capturer.stop();
        }
        self.state = SchedulerState::Stopped;
        was_running
    }
}

enum TickOutcome {
    Frame { raw: RawFrame, first: bool },
    Idle,
    Failed(MediaError),
    Expired,
}

impl CaptureScheduler {
    /// Create a stopped scheduler
    pub fn new(
        ctx: &RuntimeContext,
        capturer: Box<dyn FrameCapturer>,
        capability: Capability,
        delegate: Arc<dyn CaptureDelegate>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                handle: ctx.handle().clone(),
                delegate,
                epoch: Instant::now(),
                core: Mutex::new(SchedulerCore {
                    state: SchedulerState::Stopped,
                    capability,
                    capturer,
                    generation: 0,
                    timer: None,
                    stats: SchedulerStats::default(),
                }),
            }),
        }
    }

    /// Create a scheduler feeding `source` and install it as the source's controller
    pub fn attach(
        ctx: &RuntimeContext,
        capturer: Box<dyn FrameCapturer>,
        source: &Arc<VideoSource>,
    ) -> Self {
        let scheduler = Self::new(ctx, capturer, source.capability(), source.capture_delegate());
        source.set_capturer_controller(Arc::new(scheduler.clone()));
        scheduler
    }

    /// Current state
    pub fn state(&self) -> SchedulerState {
        self.inner.core.lock().state
    }

    /// Whether `start` would be accepted from the stopped state
    pub fn can_start(&self) -> bool {
        self.inner.core.lock().can_start()
    }

    /// Capability used for the next start
    pub fn capability(&self) -> Capability {
        self.inner.core.lock().capability.clone()
    }

    /// Target framerate
    pub fn target_framerate(&self) -> f64 {
        self.inner.core.lock().capability.framerate
    }

    /// Get capture statistics
    pub fn stats(&self) -> SchedulerStats {
        self.inner.core.lock().stats.clone()
    }

    /// Start capturing
    ///
    /// Only accepted when stopped, with a positive target framerate and a selected
    /// source. Captures one frame right away, then one per frame interval.
    pub fn start(&self) -> bool {
        let failure = {
            let mut core = self.inner.core.lock();
            if core.state != SchedulerState::Stopped {
                debug!("Ignoring start in {:?}", core.state);
                return false;
            }
            if !core.can_start() {
                debug!(
                    "Cannot start capture (framerate {}, source selected: {})",
                    core.capability.framerate,
                    core.capturer.has_source()
                );
                return false;
            }

            core.state = SchedulerState::Starting;
            let capability = core.capability.clone();
            match core.capturer.start(&capability) {
                Ok(()) => {
                    core.stats.starts += 1;
                    self.arm(&mut core, true);
                    info!(
                        "Capture started at {}x{}@{}",
                        capability.width, capability.height, capability.framerate
                    );
                    return true;
                }
                Err(e) => {
                    core.state = SchedulerState::Stopped;
                    e
                }
            }
        };

        warn!("Capturer failed to start: {}", failure);
        if matches!(failure, MediaError::PermanentCapture { .. }) {
            self.inner.delegate.on_capture_failed(&failure);
        }
        false
    }

    /// Stop capturing (idempotent)
    pub fn stop(&self) {
        let was_running = self.inner.core.lock().halt();
        if was_running {
            info!("Capture stopped");
            self.inner.delegate.on_capture_stopped();
        }
    }

    /// Change the target framerate
    ///
    /// While running the timer is rearmed at the new interval; a rate of zero pauses
    /// the timer without leaving the running state. Negative and non-finite rates are
    /// ignored.
    pub fn set_target_framerate(&self, fps: f64) {
        if !fps.is_finite() || fps < 0.0 {
            warn!("Ignoring invalid target framerate {}", fps);
            return;
        }
        let mut core = self.inner.core.lock();
        core.capability.framerate = fps;
        if core.state.is_running() {
            debug!("Rearming capture timer at {} fps", fps);
            self.arm(&mut core, false);
        }
    }

    fn arm(&self, core: &mut SchedulerCore, immediate: bool) {
        core.disarm();
        let Some(period) = core.capability.frame_interval() else {
            return;
        };
        let generation = core.generation;
        let weak = Arc::downgrade(&self.inner);

        core.timer = Some(self.inner.handle.spawn(async move {
            let start = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !SchedulerInner::tick(&inner, generation) {
                    break;
                }
            }
        }));
    }
}

impl SchedulerInner {
    /// One capture; returns whether the timer keeps going
    fn tick(inner: &Arc<SchedulerInner>, generation: u64) -> bool {
        let outcome = {
            let mut core = inner.core.lock();
            if core.generation != generation || !core.state.is_running() {
                TickOutcome::Expired
            } else {
                match core.capturer.capture_next_frame() {
                    Ok(Some(buffer)) => {
                        core.stats.frames_captured += 1;
                        let first = core.state == SchedulerState::Starting;
                        core.state = SchedulerState::Started;
                        let timestamp_us =
                            Instant::now().duration_since(inner.epoch).as_micros() as i64;
                        let raw = RawFrame::new(buffer, timestamp_us)
                            .with_rotation(core.capturer.rotation());
                        TickOutcome::Frame { raw, first }
                    }
                    Ok(None) => {
                        core.stats.empty_captures += 1;
                        TickOutcome::Idle
                    }
                    Err(e @ MediaError::PermanentCapture { .. }) => {
                        core.halt();
                        TickOutcome::Failed(e)
                    }
                    Err(e) => {
                        core.stats.transient_errors += 1;
                        trace!("Frame lost: {}", e);
                        TickOutcome::Idle
                    }
                }
            }
        };

        match outcome {
            TickOutcome::Frame { raw, first } => {
                inner.delegate.on_captured_frame(raw);
                if first {
                    inner.delegate.on_capture_started();
                }
                true
            }
            TickOutcome::Idle => true,
            TickOutcome::Failed(e) => {
                warn!("Capture failed permanently: {}", e);
                inner.delegate.on_capture_failed(&e);
                false
            }
            TickOutcome::Expired => false,
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(timer) = core.timer.take() {
            timer.abort();
        }
        if core.state.is_running() {
            core.capturer.stop();
        }
    }
}

impl CapturerController for CaptureScheduler {
    fn request(&self, capability: &Capability) {
        self.inner.core.lock().capability = capability.clone();
        if self.state() == SchedulerState::Stopped && !self.start() {
            debug!("Capture request could not start the scheduler");
        }
    }

    fn release(&self) {
        self.stop();
    }

    fn reset(&self, capability: &Capability) {
        {
            let mut core = self.inner.core.lock();
            core.halt();
            core.capability = capability.clone();
        }
        self.start();
    }
}

impl std::fmt::Debug for CaptureScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("CaptureScheduler")
            .field("state", &core.state)
            .field("capability", &core.capability)
            .field("stats", &core.stats)
            .finish()
    }
}
