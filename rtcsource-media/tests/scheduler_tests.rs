//! Capture scheduler tests
//!
//! Timing tests run on a paused clock so tick counts are exact.

use parking_lot::Mutex;
use rtcsource_core::{RuntimeConfig, RuntimeContext};
use rtcsource_media::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

type CaptureResult = MediaResult<Option<PixelBuffer>>;

fn picture() -> PixelBuffer {
    PixelBuffer::from_vec(
        PixelFormat::I420,
        4,
        4,
        vec![0; PixelFormat::I420.buffer_size(4, 4)],
    )
    .unwrap()
}

#[derive(Default)]
struct CapturerLog {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

/// Plays back scripted results, then produces pictures forever
struct ScriptedCapturer {
    script: VecDeque<CaptureResult>,
    start_error: Option<MediaError>,
    has_source: bool,
    log: Arc<CapturerLog>,
}

impl ScriptedCapturer {
    fn new(log: Arc<CapturerLog>) -> Self {
        Self {
            script: VecDeque::new(),
            start_error: None,
            has_source: true,
            log,
        }
    }

    fn then(mut self, result: CaptureResult) -> Self {
        self.script.push_back(result);
        self
    }
}

impl FrameCapturer for ScriptedCapturer {
    fn has_source(&self) -> bool {
        self.has_source
    }

    fn start(&mut self, _capability: &Capability) -> MediaResult<()> {
        if let Some(error) = self.start_error.clone() {
            return Err(error);
        }
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn capture_next_frame(&mut self) -> CaptureResult {
        self.script.pop_front().unwrap_or_else(|| Ok(Some(picture())))
    }
}

#[derive(Default)]
struct RecordingDelegate {
    frames: Mutex<Vec<RawFrame>>,
    started: AtomicUsize,
    stopped: AtomicUsize,
    failures: Mutex<Vec<MediaError>>,
}

impl RecordingDelegate {
    fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl CaptureDelegate for RecordingDelegate {
    fn on_captured_frame(&self, frame: RawFrame) {
        self.frames.lock().push(frame);
    }

    fn on_capture_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_capture_stopped(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn on_capture_failed(&self, error: &MediaError) {
        self.failures.lock().push(error.clone());
    }
}

fn context() -> RuntimeContext {
    RuntimeContext::from_current(RuntimeConfig::embedded()).unwrap()
}

fn at_fps(fps: f64) -> Capability {
    Capability::new(4, 4, fps, PixelFormat::I420)
}

fn new_scheduler(
    capturer: ScriptedCapturer,
    fps: f64,
) -> (CaptureScheduler, Arc<RecordingDelegate>) {
    let delegate = Arc::new(RecordingDelegate::default());
    let scheduler = CaptureScheduler::new(
        &context(),
        Box::new(capturer),
        at_fps(fps),
        delegate.clone(),
    );
    (scheduler, delegate)
}

// ============================================================================
// START CONDITIONS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_requires_positive_framerate() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, _delegate) = new_scheduler(ScriptedCapturer::new(log.clone()), 0.0);

    assert!(!scheduler.can_start());
    assert!(!scheduler.start());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(log.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_source() {
    let log = Arc::new(CapturerLog::default());
    let mut capturer = ScriptedCapturer::new(log);
    capturer.has_source = false;
    let (scheduler, _delegate) = new_scheduler(capturer, 30.0);

    assert!(!scheduler.start());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_start_failures() {
    let log = Arc::new(CapturerLog::default());
    let mut transient = ScriptedCapturer::new(log.clone());
    transient.start_error = Some(MediaError::TransientCapture {
        reason: "busy".to_string(),
    });
    let (scheduler, delegate) = new_scheduler(transient, 30.0);
    assert!(!scheduler.start());
    assert!(delegate.failures.lock().is_empty());

    let mut permanent = ScriptedCapturer::new(log);
    permanent.start_error = Some(MediaError::PermanentCapture {
        reason: "no permission".to_string(),
    });
    let (scheduler, delegate) = new_scheduler(permanent, 30.0);
    assert!(!scheduler.start());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(delegate.failures.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_only_from_stopped() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, _delegate) = new_scheduler(ScriptedCapturer::new(log.clone()), 30.0);

    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert_eq!(log.starts.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.stats().starts, 1);
}

// ============================================================================
// TIMING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_captures_at_target_framerate() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, delegate) = new_scheduler(ScriptedCapturer::new(log), 10.0);

    assert!(scheduler.start());
    assert_eq!(scheduler.state(), SchedulerState::Starting);

    // Ticks at 0, 100 and 200 ms
    sleep(Duration::from_millis(250)).await;

    assert_eq!(delegate.frame_count(), 3);
    assert_eq!(scheduler.state(), SchedulerState::Started);
    assert_eq!(delegate.started.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.stats().frames_captured, 3);

    let frames = delegate.frames.lock();
    assert!(frames[1].timestamp_us - frames[0].timestamp_us >= 100_000);
}

#[tokio::test(start_paused = true)]
async fn test_rearm_keeps_state() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, delegate) = new_scheduler(ScriptedCapturer::new(log), 10.0);
    assert!(scheduler.start());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(delegate.frame_count(), 1);

    // First tick one new interval after the change: 100, 150, 200, 250 ms
    scheduler.set_target_framerate(20.0);
    sleep(Duration::from_millis(210)).await;

    assert_eq!(delegate.frame_count(), 5);
    assert_eq!(scheduler.state(), SchedulerState::Started);
    assert_eq!(scheduler.target_framerate(), 20.0);
    assert_eq!(delegate.started.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_framerate_pauses_timer() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, delegate) = new_scheduler(ScriptedCapturer::new(log), 10.0);
    assert!(scheduler.start());
    sleep(Duration::from_millis(50)).await;

    scheduler.set_target_framerate(0.0);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(delegate.frame_count(), 1);
    assert_eq!(scheduler.state(), SchedulerState::Started);

    scheduler.set_target_framerate(-5.0);
    scheduler.set_target_framerate(f64::NAN);
    assert_eq!(scheduler.target_framerate(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_halts_ticks() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, delegate) = new_scheduler(ScriptedCapturer::new(log.clone()), 10.0);
    assert!(scheduler.start());
    sleep(Duration::from_millis(50)).await;

    scheduler.stop();
    scheduler.stop();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(delegate.frame_count(), 1);
    assert_eq!(delegate.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(log.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_reports_started_again() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, delegate) = new_scheduler(ScriptedCapturer::new(log), 10.0);
    assert!(scheduler.start());
    sleep(Duration::from_millis(50)).await;
    scheduler.stop();

    assert!(scheduler.start());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(delegate.started.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.stats().starts, 2);
}

// ============================================================================
// CAPTURE ERRORS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_errors_and_empty_ticks_continue() {
    let log = Arc::new(CapturerLog::default());
    let capturer = ScriptedCapturer::new(log)
        .then(Err(MediaError::TransientCapture {
            reason: "timeout".to_string(),
        }))
        .then(Ok(None));
    let (scheduler, delegate) = new_scheduler(capturer, 10.0);
    assert!(scheduler.start());

    sleep(Duration::from_millis(150)).await;
    assert_eq!(scheduler.state(), SchedulerState::Starting);
    assert_eq!(delegate.frame_count(), 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(scheduler.state(), SchedulerState::Started);
    assert_eq!(delegate.frame_count(), 1);

    let stats = scheduler.stats();
    assert_eq!(stats.transient_errors, 1);
    assert_eq!(stats.empty_captures, 1);
    assert!(delegate.failures.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_stops_capture() {
    let log = Arc::new(CapturerLog::default());
    let capturer = ScriptedCapturer::new(log.clone())
        .then(Ok(Some(picture())))
        .then(Err(MediaError::PermanentCapture {
            reason: "device lost".to_string(),
        }));
    let (scheduler, delegate) = new_scheduler(capturer, 10.0);
    assert!(scheduler.start());

    sleep(Duration::from_millis(500)).await;

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(delegate.frame_count(), 1);
    assert_eq!(delegate.failures.lock().len(), 1);
    assert_eq!(delegate.stopped.load(Ordering::SeqCst), 0);
    assert_eq!(log.stops.load(Ordering::SeqCst), 1);
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_controller_protocol() {
    let log = Arc::new(CapturerLog::default());
    let (scheduler, delegate) = new_scheduler(ScriptedCapturer::new(log.clone()), 10.0);

    scheduler.request(&at_fps(25.0));
    assert_eq!(scheduler.state(), SchedulerState::Starting);
    assert_eq!(scheduler.target_framerate(), 25.0);

    scheduler.reset(&at_fps(5.0));
    assert_eq!(scheduler.target_framerate(), 5.0);
    assert_eq!(log.starts.load(Ordering::SeqCst), 2);
    assert_eq!(delegate.stopped.load(Ordering::SeqCst), 0);

    scheduler.release();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(delegate.stopped.load(Ordering::SeqCst), 1);
}

// ============================================================================
// END TO END
// ============================================================================

#[derive(Default)]
struct FrameCounter {
    frames: AtomicUsize,
}

impl VideoSink for FrameCounter {
    fn on_frame(&self, _frame: &VideoFrame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn on_discarded_frame(&self) {}
}

#[tokio::test]
async fn test_attached_scheduler_drives_source() {
    let ctx = context();
    let config = VideoSourceConfig {
        capability: Capability::new(64, 48, 50.0, PixelFormat::I420),
        ..Default::default()
    };
    let source = VideoSource::new(&ctx, config).unwrap();
    let scheduler = CaptureScheduler::attach(&ctx, Box::new(PatternCapturer::new(3)), &source);
    source.flushed().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    let sink = Arc::new(FrameCounter::default());
    source.add_or_update_sink(sink.clone(), SinkWants::default());
    source.flushed().await.unwrap();
    assert!(scheduler.state() != SchedulerState::Stopped);

    sleep(Duration::from_millis(200)).await;
    source.flushed().await.unwrap();
    assert!(sink.frames.load(Ordering::SeqCst) > 0);
    assert_eq!(source.state(), SourceState::Live);
    assert_eq!(source.last_resolution(), Some(Resolution::new(64, 48)));

    let sink: Arc<dyn VideoSink> = sink;
    source.remove_sink(&sink);
    source.flushed().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(source.state(), SourceState::Muted);
}
