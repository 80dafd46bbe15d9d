//! Synthetic camera demo
//!
//! Runs a test-pattern capturer through a local track with two sinks: a full size
//! preview and a thumbnail limited to 320x180 at 5 fps. Prints source events and frame
//! counts, then mutes, unmutes and stops the track.
//!
//! Run with `RUST_LOG=rtcsource=debug` for pipeline logs.

use anyhow::Context;
use futures::StreamExt;
use rtcsource::{
    GlobalConfig, PatternCapturer, RtcSource, SinkWants, SourceEvent, VideoFrame, VideoOptions,
    VideoSink,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct FrameCounter {
    name: &'static str,
    frames: AtomicU64,
    discarded: AtomicU64,
}

impl FrameCounter {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            frames: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        })
    }

    fn report(&self) {
        println!(
            "   📊 {}: {} frames, {} discarded",
            self.name,
            self.frames.load(Ordering::Relaxed),
            self.discarded.load(Ordering::Relaxed)
        );
    }
}

impl VideoSink for FrameCounter {
    fn on_frame(&self, frame: &VideoFrame) {
        if self.frames.fetch_add(1, Ordering::Relaxed) == 0 {
            let size = frame.resolution();
            println!("   🖼️ {} first frame {}x{}", self.name, size.width, size.height);
        }
    }

    fn on_discarded_frame(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("📹 Synthetic camera demo");
    let rtc = RtcSource::attach_current(GlobalConfig::desktop())
        .context("failed to initialize rtcsource")?;
    let track = rtc
        .local_video_track("synthetic", Box::new(PatternCapturer::new(4)))
        .context("failed to create track")?;

    let mut events = track.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                SourceEvent::StateChanged { state } => println!("   🔄 State: {:?}", state),
                SourceEvent::FatalError { details } => println!("   ❌ Fatal: {}", details),
                other => println!("   📡 Event: {}", other.event_type()),
            }
        }
    });

    let preview = FrameCounter::new("preview");
    let thumbnail = FrameCounter::new("thumbnail");
    track.add_sink(preview.clone(), SinkWants::default());
    track.add_sink(
        thumbnail.clone(),
        SinkWants::default()
            .with_max_pixel_count(320 * 180)
            .with_max_framerate(5.0),
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    preview.report();
    thumbnail.report();

    println!("⚙️ Switching to 1280x720");
    track.set_options(VideoOptions::resolution(1280, 720))?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    println!("🔇 Muting");
    track.mute();
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("🔊 Unmuting");
    track.unmute();
    tokio::time::sleep(Duration::from_secs(1)).await;

    track.stop();
    track.settled().await?;
    preview.report();
    thumbnail.report();
    println!("   {:?}", track.stats());
    println!("✅ Done");
    Ok(())
}
