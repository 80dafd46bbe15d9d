//! Plane resampling and rotation
//!
//! All filters work on one plane at a time. Interleaved planes (NV12 chroma, packed
//! RGB) are resampled per channel with `channels` samples per pixel.

use crate::buffer::{Crop, PixelBuffer};
use crate::format::{subsampled, PixelFormat, Rotation, ScaleFilter};
use crate::pool::BufferLease;

/// Source region of a plane
struct PlaneView<'a> {
    data: &'a [u8],
    stride: usize,
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

/// Destination plane
struct PlaneTarget<'a> {
    data: &'a mut [u8],
    stride: usize,
    width: usize,
    height: usize,
}

fn scale_plane(src: &PlaneView<'_>, dst: &mut PlaneTarget<'_>, channels: usize, filter: ScaleFilter) {
    let at = |x: usize, y: usize, c: usize| -> u8 {
        src.data[(src.y + y) * src.stride + (src.x + x) * channels + c]
    };

    match filter {
        ScaleFilter::Nearest => {
            for out_y in 0..dst.height {
                let in_y = (out_y * src.height / dst.height).min(src.height - 1);
                for out_x in 0..dst.width {
                    let in_x = (out_x * src.width / dst.width).min(src.width - 1);
                    for c in 0..channels {
                        dst.data[out_y * dst.stride + out_x * channels + c] = at(in_x, in_y, c);
                    }
                }
            }
        }
        ScaleFilter::Bilinear => {
            let x_ratio = (src.width as f32 - 1.0) / (dst.width as f32).max(1.0);
            let y_ratio = (src.height as f32 - 1.0) / (dst.height as f32).max(1.0);

            for out_y in 0..dst.height {
                let src_y = out_y as f32 * y_ratio;
                let y0 = src_y.floor() as usize;
                let y1 = (y0 + 1).min(src.height - 1);
                let y_frac = src_y - y0 as f32;

                for out_x in 0..dst.width {
                    let src_x = out_x as f32 * x_ratio;
                    let x0 = src_x.floor() as usize;
                    let x1 = (x0 + 1).min(src.width - 1);
                    let x_frac = src_x - x0 as f32;

                    for c in 0..channels {
                        let p00 = at(x0, y0, c) as f32;
                        let p10 = at(x1, y0, c) as f32;
                        let p01 = at(x0, y1, c) as f32;
                        let p11 = at(x1, y1, c) as f32;

                        let top = p00 + x_frac * (p10 - p00);
                        let bottom = p01 + x_frac * (p11 - p01);
                        let value = top + y_frac * (bottom - top);
                        dst.data[out_y * dst.stride + out_x * channels + c] = value.round() as u8;
                    }
                }
            }
        }
        ScaleFilter::Box => {
            for out_y in 0..dst.height {
                let (y0, y1) = box_span(out_y, src.height, dst.height);
                for out_x in 0..dst.width {
                    let (x0, x1) = box_span(out_x, src.width, dst.width);
                    let count = ((y1 - y0) * (x1 - x0)) as u32;
                    for c in 0..channels {
                        let mut sum = 0u32;
                        for y in y0..y1 {
                            for x in x0..x1 {
                                sum += at(x, y, c) as u32;
                            }
                        }
                        dst.data[out_y * dst.stride + out_x * channels + c] =
                            ((sum + count / 2) / count) as u8;
                    }
                }
            }
        }
    }
}

/// Source interval covered by output sample `out` (at least one sample wide)
fn box_span(out: usize, in_len: usize, out_len: usize) -> (usize, usize) {
    let start = (out * in_len / out_len).min(in_len - 1);
    let end = ((out + 1) * in_len).div_ceil(out_len).clamp(start + 1, in_len);
    (start, end)
}

/// Crop and scale an I420 or NV12 picture into `dst` (same format)
pub(crate) fn scale_yuv420(src: &PixelBuffer, crop: Crop, dst: &mut BufferLease, filter: ScaleFilter) {
    let semi_planar = src.format() == PixelFormat::Nv12;
    let out_w = dst.width();
    let out_h = dst.height();

    for plane in 0..src.format().plane_count() {
        let (view, target_w, target_h) = if plane == 0 {
            (
                PlaneView {
                    data: src.data(0),
                    stride: src.stride(0),
                    x: crop.x as usize,
                    y: crop.y as usize,
                    width: crop.width as usize,
                    height: crop.height as usize,
                },
                out_w as usize,
                out_h as usize,
            )
        } else {
            let x0 = crop.x >> 1;
            let y0 = crop.y >> 1;
            (
                PlaneView {
                    data: src.data(plane),
                    stride: src.stride(plane),
                    x: x0 as usize,
                    y: y0 as usize,
                    width: (subsampled(crop.x + crop.width, 1) - x0) as usize,
                    height: (subsampled(crop.y + crop.height, 1) - y0) as usize,
                },
                subsampled(out_w, 1) as usize,
                subsampled(out_h, 1) as usize,
            )
        };
        let channels = if plane == 1 && semi_planar { 2 } else { 1 };

        let stride = dst.stride(plane);
        let mut target = PlaneTarget {
            data: dst.plane_mut(plane),
            stride,
            width: target_w,
            height: target_h,
        };
        scale_plane(&view, &mut target, channels, filter);
    }
}

/// Crop and scale a packed RGB-family picture into `dst` (same format)
pub(crate) fn scale_packed(src: &PixelBuffer, crop: Crop, dst: &mut BufferLease, filter: ScaleFilter) {
    let view = PlaneView {
        data: src.data(0),
        stride: src.stride(0),
        x: crop.x as usize,
        y: crop.y as usize,
        width: crop.width as usize,
        height: crop.height as usize,
    };
    let (width, height) = (dst.width() as usize, dst.height() as usize);
    let stride = dst.stride(0);
    let mut target = PlaneTarget {
        data: dst.plane_mut(0),
        stride,
        width,
        height,
    };
    scale_plane(&view, &mut target, src.format().bytes_per_sample(), filter);
}

/// Rotate an I420 picture clockwise into `dst`
pub(crate) fn rotate_i420(src: &PixelBuffer, dst: &mut BufferLease, rotation: Rotation) {
    for plane in 0..3 {
        let (w, h) = if plane == 0 {
            (src.width() as usize, src.height() as usize)
        } else {
            (
                subsampled(src.width(), 1) as usize,
                subsampled(src.height(), 1) as usize,
            )
        };
        let data = src.data(plane);
        let stride = src.stride(plane);
        let dst_stride = dst.stride(plane);
        let out = dst.plane_mut(plane);

        let (out_w, out_h) = if rotation.swaps_dimensions() { (h, w) } else { (w, h) };
        for dy in 0..out_h {
            for dx in 0..out_w {
                let (sx, sy) = match rotation {
                    Rotation::None => (dx, dy),
                    Rotation::Cw90 => (dy, h - 1 - dx),
                    Rotation::Cw180 => (w - 1 - dx, h - 1 - dy),
                    Rotation::Cw270 => (w - 1 - dy, dx),
                };
                out[dy * dst_stride + dx] = data[sy * stride + sx];
            }
        }
    }
}
