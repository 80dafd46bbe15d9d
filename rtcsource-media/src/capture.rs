//! Capture collaborators
//!
//! Platform backends plug into the pipeline through [`FrameCapturer`]. The scheduler
//! pumps the capturer and reports results through [`CaptureDelegate`]; the video source
//! drives the scheduler through [`CapturerController`]. [`PatternCapturer`] is a pure
//! software backend producing a moving test pattern.

use crate::buffer::PixelBuffer;
use crate::error::{MediaError, MediaResult};
use crate::format::{subsampled, PixelFormat, Resolution, Rotation};
use crate::frame::{RawFrame, VideoFrame};
use crate::pool::BufferPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Highest framerate a capability may request
pub const MAX_FRAMERATE: f64 = 240.0;

/// Requested capture format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub framerate: f64,
    /// Pixel format the capturer should deliver
    pub pixel_format: PixelFormat,
}

impl Capability {
    /// Create a capability
    pub fn new(width: u32, height: u32, framerate: f64, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            framerate,
            pixel_format,
        }
    }

    /// 640x480 at 30 fps
    pub fn vga() -> Self {
        Self::new(640, 480, 30.0, PixelFormat::I420)
    }

    /// 1280x720 at 30 fps
    pub fn hd() -> Self {
        Self::new(1280, 720, 30.0, PixelFormat::I420)
    }

    /// 1920x1080 at 30 fps
    pub fn full_hd() -> Self {
        Self::new(1920, 1080, 30.0, PixelFormat::I420)
    }

    /// Picture size
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Capture period, `None` for a non-positive framerate
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.framerate.is_finite() && self.framerate > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / self.framerate))
    }

    /// Validate capability
    pub fn validate(&self) -> MediaResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("Invalid resolution {}x{}", self.width, self.height),
            });
        }
        if !self.framerate.is_finite() || self.framerate <= 0.0 || self.framerate > MAX_FRAMERATE
        {
            return Err(MediaError::InvalidConfiguration {
                message: format!("Framerate {} outside (0, {}]", self.framerate, MAX_FRAMERATE),
            });
        }
        Ok(())
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::vga()
    }
}

/// Description of a capture device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable device identifier
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Formats the device advertises (empty when unknown)
    pub capabilities: Vec<Capability>,
}

impl DeviceInfo {
    /// Create device info without advertised capabilities
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
        }
    }

    /// Add an advertised capability
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Whether the device can deliver `capability`
    ///
    /// Devices that advertise nothing are assumed to support everything.
    pub fn supports(&self, capability: &Capability) -> bool {
        self.capabilities.is_empty()
            || self.capabilities.iter().any(|c| {
                c.width == capability.width
                    && c.height == capability.height
                    && c.pixel_format == capability.pixel_format
                    && capability.framerate <= c.framerate
            })
    }
}

/// Partial update of the capture capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoOptions {
    /// New picture size
    pub resolution: Option<Resolution>,
    /// New framerate
    pub framerate: Option<f64>,
    /// New pixel format
    pub pixel_format: Option<PixelFormat>,
}

impl VideoOptions {
    /// Options changing only the resolution
    pub fn resolution(width: u32, height: u32) -> Self {
        Self {
            resolution: Some(Resolution::new(width, height)),
            ..Default::default()
        }
    }

    /// Options changing only the framerate
    pub fn framerate(framerate: f64) -> Self {
        Self {
            framerate: Some(framerate),
            ..Default::default()
        }
    }

    /// The capability that results from applying these options to `current`
    pub fn apply_to(&self, current: &Capability) -> Capability {
        let mut next = current.clone();
        if let Some(resolution) = self.resolution {
            next.width = resolution.width;
            next.height = resolution.height;
        }
        if let Some(framerate) = self.framerate {
            next.framerate = framerate;
        }
        if let Some(format) = self.pixel_format {
            next.pixel_format = format;
        }
        next
    }

    /// Whether applying changes nothing
    pub fn is_empty(&self) -> bool {
        self.resolution.is_none() && self.framerate.is_none() && self.pixel_format.is_none()
    }
}

/// Acceptance check run before options or device info take effect
pub trait CapabilityValidator: Send + Sync {
    /// Check the capability `options` would produce
    fn validate_options(
        &self,
        candidate: &Capability,
        device: Option<&DeviceInfo>,
    ) -> Result<(), String> {
        candidate.validate().map_err(|e| e.to_string())?;
        match device {
            Some(device) if !device.supports(candidate) => Err(format!(
                "Device {} does not support {}x{}@{}",
                device.id, candidate.width, candidate.height, candidate.framerate
            )),
            _ => Ok(()),
        }
    }

    /// Check a new device
    fn validate_device(&self, device: &DeviceInfo, current: &Capability) -> Result<(), String> {
        if device.id.is_empty() {
            return Err("Device id must not be empty".to_string());
        }
        if !device.supports(current) {
            return Err(format!(
                "Device {} cannot deliver the current {}x{}@{}",
                device.id, current.width, current.height, current.framerate
            ));
        }
        Ok(())
    }
}

/// Validator with the default checks
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValidator;

impl CapabilityValidator for DefaultValidator {}

/// Platform capture backend
///
/// Owned by the [`CaptureScheduler`](crate::scheduler::CaptureScheduler), which calls
/// it from timer context, one call at a time.
pub trait FrameCapturer: Send + 'static {
    /// Whether a device or screen is selected
    fn has_source(&self) -> bool;

    /// Open the source with `capability`
    fn start(&mut self, capability: &Capability) -> MediaResult<()>;

    /// Close the source
    fn stop(&mut self);

    /// Grab one picture
    ///
    /// `Ok(None)` means no new picture is available. Any error other than
    /// [`MediaError::PermanentCapture`] only costs the current frame.
    fn capture_next_frame(&mut self) -> MediaResult<Option<PixelBuffer>>;

    /// Rotation of the pictures this capturer produces
    fn rotation(&self) -> Rotation {
        Rotation::None
    }
}

/// External processor that takes frames ahead of sink broadcast
///
/// The filter may hand frames back through
/// [`VideoSource::deliver_filtered`](crate::video_source::VideoSource::deliver_filtered).
pub trait FrameFilter: Send + Sync {
    /// Frames bypass the filter while paused
    fn is_paused(&self) -> bool;

    /// An accepted frame
    fn on_frame(&self, frame: VideoFrame);
}

/// Receiver of capture results
pub trait CaptureDelegate: Send + Sync {
    /// A captured frame, delivered from the producer context
    fn on_captured_frame(&self, frame: RawFrame);

    /// The first frame after a start was delivered
    fn on_capture_started(&self);

    /// Capture stopped on request
    fn on_capture_stopped(&self);

    /// The capturer failed permanently; capture has stopped
    fn on_capture_failed(&self, error: &MediaError);
}

/// Control seam between a video source and whatever runs its capturer
pub trait CapturerController: Send + Sync {
    /// Ensure capture runs with `capability`
    fn request(&self, capability: &Capability);

    /// Ensure capture is stopped
    fn release(&self);

    /// Restart capture with a new capability
    fn reset(&self, capability: &Capability) {
        self.release();
        self.request(capability);
    }
}

/// Software capturer drawing a moving gradient
///
/// Pictures are allocated from a private [`BufferPool`] in the requested format. Only
/// I420 and the packed RGB formats are generated; anything else is captured as I420.
pub struct PatternCapturer {
    pool: Arc<BufferPool>,
    capability: Option<Capability>,
    frame_index: u64,
    has_source: bool,
    rotation: Rotation,
}

impl PatternCapturer {
    /// Create a capturer with a pool of `pool_capacity` pictures
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            pool: Arc::new(BufferPool::new(pool_capacity)),
            capability: None,
            frame_index: 0,
            has_source: true,
            rotation: Rotation::None,
        }
    }

    /// Report no selected source, so schedulers refuse to start
    pub fn without_source(mut self) -> Self {
        self.has_source = false;
        self
    }

    /// Tag every picture with `rotation`
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Pool the pictures are drawn into
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Pictures produced since the last start
    pub fn frames_produced(&self) -> u64 {
        self.frame_index
    }

    fn draw(&self, capability: &Capability) -> MediaResult<PixelBuffer> {
        let format = match capability.pixel_format {
            f if f == PixelFormat::I420 || f.is_packed() => f,
            _ => PixelFormat::I420,
        };
        let (width, height) = (capability.width, capability.height);
        let mut lease = self.pool.acquire_or_unpooled(width, height, format)?;
        let shift = (self.frame_index * 4) as usize;

        if format.is_packed() {
            let bpp = format.bytes_per_sample();
            let stride = lease.stride(0);
            let plane = lease.plane_mut(0);
            for row in 0..height as usize {
                for col in 0..width as usize {
                    let i = row * stride + col * bpp;
                    let value = ((col + row + shift) & 0xff) as u8;
                    plane[i..i + bpp].fill(value);
                }
            }
        } else {
            let stride = lease.stride(0);
            let luma = lease.plane_mut(0);
            for row in 0..height as usize {
                for col in 0..width as usize {
                    luma[row * stride + col] = ((col + row + shift) & 0xff) as u8;
                }
            }
            let chroma_rows = subsampled(height, 1) as usize;
            for plane in 1..3 {
                let stride = lease.stride(plane);
                lease.plane_mut(plane)[..stride * chroma_rows].fill(128);
            }
        }
        Ok(lease.freeze())
    }
}

impl FrameCapturer for PatternCapturer {
    fn has_source(&self) -> bool {
        self.has_source
    }

    fn start(&mut self, capability: &Capability) -> MediaResult<()> {
        capability.validate()?;
        debug!(
            "Pattern capturer started at {}x{}@{}",
            capability.width, capability.height, capability.framerate
        );
        self.capability = Some(capability.clone());
        self.frame_index = 0;
        Ok(())
    }

    fn stop(&mut self) {
        self.capability = None;
    }

    fn capture_next_frame(&mut self) -> MediaResult<Option<PixelBuffer>> {
        let Some(capability) = self.capability.clone() else {
            return Ok(None);
        };
        let buffer = self.draw(&capability)?;
        self.frame_index += 1;
        Ok(Some(buffer))
    }

    fn rotation(&self) -> Rotation {
        self.rotation
    }
}

impl std::fmt::Debug for PatternCapturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCapturer")
            .field("capability", &self.capability)
            .field("frame_index", &self.frame_index)
            .field("has_source", &self.has_source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_validation() {
        assert!(Capability::hd().validate().is_ok());
        assert!(Capability::new(0, 480, 30.0, PixelFormat::I420).validate().is_err());
        assert!(Capability::new(640, 480, 0.0, PixelFormat::I420).validate().is_err());
        assert!(Capability::new(640, 480, f64::NAN, PixelFormat::I420).validate().is_err());
        assert_eq!(Capability::vga().frame_interval(), Some(Duration::from_secs_f64(1.0 / 30.0)));
        assert_eq!(Capability::new(640, 480, 0.0, PixelFormat::I420).frame_interval(), None);
    }

    #[test]
    fn test_options_apply_partially() {
        let next = VideoOptions::framerate(15.0).apply_to(&Capability::hd());
        assert_eq!(next, Capability::new(1280, 720, 15.0, PixelFormat::I420));
        assert!(VideoOptions::default().is_empty());
    }

    #[test]
    fn test_device_support() {
        let device = DeviceInfo::new("cam0", "Front camera").with_capability(Capability::vga());
        assert!(device.supports(&Capability::new(640, 480, 15.0, PixelFormat::I420)));
        assert!(!device.supports(&Capability::hd()));
        assert!(DeviceInfo::new("any", "Unknown").supports(&Capability::full_hd()));
    }

    #[test]
    fn test_default_validator() {
        let validator = DefaultValidator;
        let device = DeviceInfo::new("cam0", "Front camera").with_capability(Capability::vga());
        assert!(validator.validate_options(&Capability::vga(), Some(&device)).is_ok());
        assert!(validator.validate_options(&Capability::hd(), Some(&device)).is_err());
        assert!(validator
            .validate_device(&DeviceInfo::default(), &Capability::vga())
            .is_err());
        assert!(validator.validate_device(&device, &Capability::hd()).is_err());
    }

    #[test]
    fn test_pattern_capturer_reuses_pool() {
        let mut capturer = PatternCapturer::new(2);
        assert_eq!(capturer.capture_next_frame().unwrap().map(|b| b.width()), None);

        capturer.start(&Capability::new(16, 8, 30.0, PixelFormat::I420)).unwrap();
        let first = capturer.capture_next_frame().unwrap().unwrap();
        let slot = first.pool_slot();
        assert!(slot.is_some());
        assert!(first.data(1).iter().all(|&v| v == 128));
        drop(first);

        let second = capturer.capture_next_frame().unwrap().unwrap();
        assert_eq!(second.pool_slot(), slot);
        assert_eq!(capturer.frames_produced(), 2);
    }

    #[test]
    fn test_pattern_capturer_packed() {
        let mut capturer = PatternCapturer::new(1);
        capturer.start(&Capability::new(4, 4, 30.0, PixelFormat::Rgba)).unwrap();
        let frame = capturer.capture_next_frame().unwrap().unwrap();
        assert_eq!(frame.format(), PixelFormat::Rgba);
        assert_eq!(&frame.data(0)[4..8], &[1, 1, 1, 1]);
        assert_eq!(frame.to_canonical().unwrap().format(), PixelFormat::I420);
    }
}
