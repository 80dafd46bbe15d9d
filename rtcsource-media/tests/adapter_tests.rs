//! Sink adaptation conformance tests
//!
//! These pin the adaptation policy: passthrough identity, the scale ladder, centered
//! crops with even offsets for YUV, framerate keep/drop decisions and rotation.

use rtcsource_media::*;

fn frame(width: u32, height: u32, timestamp_us: i64) -> VideoFrame {
    let data = vec![100u8; PixelFormat::I420.buffer_size(width, height)];
    let buffer = PixelBuffer::from_vec(PixelFormat::I420, width, height, data).unwrap();
    VideoFrame::new(buffer, timestamp_us)
}

fn delivered(outcome: AdaptOutcome) -> VideoFrame {
    match outcome {
        AdaptOutcome::Deliver(frame) => frame,
        AdaptOutcome::Discard(reason) => panic!("unexpected discard: {:?}", reason),
    }
}

// ============================================================================
// PASSTHROUGH
// ============================================================================

#[test]
fn test_same_size_delivers_identical_buffer() {
    let input = frame(640, 480, 0);
    let mut adapter = SinkAdapter::new(SinkWants::default().with_max_pixel_count(640 * 480));

    let output = delivered(adapter.on_frame(&input, &ScaleOptions::default()));
    assert!(PixelBuffer::ptr_eq(&input.buffer, &output.buffer));
}

#[test]
fn test_default_wants_pass_through() {
    let input = frame(1280, 720, 0);
    let mut adapter = SinkAdapter::default();
    let output = delivered(adapter.on_frame(&input, &ScaleOptions::default()));
    assert!(PixelBuffer::ptr_eq(&input.buffer, &output.buffer));
    assert_eq!(output.id, input.id);
    assert_eq!(output.timestamp_us, input.timestamp_us);
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[test]
fn test_scale_ladder_reference_outputs() {
    let cases = [
        (Resolution::HD, 1280 * 720 - 1, Resolution::new(960, 540)),
        (Resolution::HD, 640 * 360, Resolution::new(640, 360)),
        (Resolution::HD, 320 * 180, Resolution::new(320, 180)),
        (Resolution::VGA, 640 * 480 / 2, Resolution::new(320, 240)),
        (Resolution::FULL_HD, 1280 * 720, Resolution::new(960, 540)),
    ];
    for (input, max, expected) in cases {
        let adapter = SinkAdapter::new(SinkWants::default().with_max_pixel_count(max));
        assert_eq!(adapter.geometry(input, true).output, expected, "{:?} <= {}", input, max);
    }
}

#[test]
fn test_scaled_frame_is_new_buffer_of_expected_size() {
    let input = frame(640, 480, 0);
    let mut adapter = SinkAdapter::new(SinkWants::default().with_max_pixel_count(320 * 240));

    let output = delivered(adapter.on_frame(&input, &ScaleOptions::default()));
    assert!(!PixelBuffer::ptr_eq(&input.buffer, &output.buffer));
    assert_eq!(output.resolution(), Resolution::new(320, 240));
    assert!(output.buffer.data(0).iter().all(|&v| v == 100));
}

#[test]
fn test_centered_crop_for_aspect() {
    let adapter = SinkAdapter::new(SinkWants::default().with_crop_aspect(16, 9));
    let geometry = adapter.geometry(Resolution::VGA, true);
    assert_eq!(geometry.crop, Crop::new(0, 60, 640, 360));
    assert_eq!(geometry.output, Resolution::new(640, 360));
}

#[test]
fn test_odd_crop_parity() {
    let adapter = SinkAdapter::new(SinkWants::default().with_crop_aspect(1, 1));

    // YUV: offsets and sizes even
    let yuv = adapter.geometry(Resolution::new(101, 51), true);
    assert_eq!(yuv.crop, Crop::new(24, 0, 50, 50));

    // Packed: exact centering
    let packed = adapter.geometry(Resolution::new(101, 51), false);
    assert_eq!(packed.crop, Crop::new(25, 0, 51, 51));
}

#[test]
fn test_pool_exhaustion_without_fallback_discards() {
    let pool = BufferPool::new(1);
    let _held = pool.acquire(320, 240, PixelFormat::I420).unwrap();
    let options = ScaleOptions {
        filter: ScaleFilter::Bilinear,
        pool: Some(&pool),
        allow_unpooled: false,
    };

    let mut adapter = SinkAdapter::new(SinkWants::default().with_max_pixel_count(320 * 240));
    let outcome = adapter.on_frame(&frame(640, 480, 0), &options);
    assert!(matches!(
        outcome,
        AdaptOutcome::Discard(DiscardReason::Adaptation(_))
    ));
}

// ============================================================================
// FRAMERATE
// ============================================================================

#[test]
fn test_framerate_keep_drop_sequence() {
    let mut adapter = SinkAdapter::new(SinkWants::default().with_max_framerate(15.0));
    let pattern: Vec<bool> = (0..9)
        .map(|i| {
            let outcome = adapter.on_frame(&frame(16, 16, i * 33_333), &ScaleOptions::default());
            matches!(outcome, AdaptOutcome::Deliver(_))
        })
        .collect();
    assert_eq!(
        pattern,
        vec![true, true, false, true, false, true, false, true, false]
    );
}

#[test]
fn test_jitter_does_not_drop_at_full_rate() {
    let mut adapter = SinkAdapter::new(SinkWants::default().with_max_framerate(30.0));
    let jitter = [0, 2_000, -1_500, 3_000, -2_500, 1_000];
    for (i, offset) in jitter.iter().enumerate() {
        let ts = i as i64 * 33_333 + offset;
        let outcome = adapter.on_frame(&frame(16, 16, ts), &ScaleOptions::default());
        assert!(matches!(outcome, AdaptOutcome::Deliver(_)), "frame {}", i);
    }
}

#[test]
fn test_changing_framerate_resets_tracker() {
    let mut adapter = SinkAdapter::new(SinkWants::default().with_max_framerate(1.0));
    assert!(matches!(
        adapter.on_frame(&frame(16, 16, 0), &ScaleOptions::default()),
        AdaptOutcome::Deliver(_)
    ));
    assert!(matches!(
        adapter.on_frame(&frame(16, 16, 100_000), &ScaleOptions::default()),
        AdaptOutcome::Discard(DiscardReason::Framerate)
    ));

    adapter.update_wants(SinkWants::default().with_max_framerate(30.0));
    assert!(matches!(
        adapter.on_frame(&frame(16, 16, 133_333), &ScaleOptions::default()),
        AdaptOutcome::Deliver(_)
    ));
}

// ============================================================================
// ROTATION
// ============================================================================

#[test]
fn test_rotation_applied_when_requested() {
    let input = frame(64, 32, 0).with_rotation(Rotation::Cw90);

    let mut rotating = SinkAdapter::new(SinkWants::default().with_rotation_applied());
    let upright = delivered(rotating.on_frame(&input, &ScaleOptions::default()));
    assert_eq!(upright.resolution(), Resolution::new(32, 64));
    assert_eq!(upright.rotation, Rotation::None);

    let mut plain = SinkAdapter::default();
    let tagged = delivered(plain.on_frame(&input, &ScaleOptions::default()));
    assert_eq!(tagged.resolution(), Resolution::new(64, 32));
    assert_eq!(tagged.rotation, Rotation::Cw90);
}

#[test]
fn test_upright_frame_with_rotation_wants_is_passthrough() {
    let input = frame(64, 32, 0);
    let mut adapter = SinkAdapter::new(SinkWants::default().with_rotation_applied());
    let output = delivered(adapter.on_frame(&input, &ScaleOptions::default()));
    assert!(PixelBuffer::ptr_eq(&input.buffer, &output.buffer));
}
