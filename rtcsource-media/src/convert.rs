//! Conversions into the canonical I420 format
//!
//! RGB to YUV uses BT.601 fixed-point coefficients. Chroma is produced by averaging
//! the 2x2 luma neighborhood each I420 chroma sample covers; edge samples of odd-sized
//! pictures reuse the last row or column.

use crate::buffer::PixelBuffer;
use crate::error::{MediaError, MediaResult};
use crate::format::{subsampled, PixelFormat};
use crate::pool::BufferLease;

/// Convert any memory-backed buffer to an unpooled I420 buffer
pub(crate) fn to_i420(src: &PixelBuffer) -> MediaResult<PixelBuffer> {
    let format = src.format();
    if format == PixelFormat::I420 {
        return Ok(src.clone());
    }

    let mut out = BufferLease::unpooled(PixelFormat::I420, src.width(), src.height())?;
    match format {
        PixelFormat::Nv12 => nv12_to_i420(src, &mut out),
        f if f.is_planar() => planar_to_i420(src, &mut out),
        f if f.is_packed() => packed_to_i420(src, &mut out),
        _ => {
            return Err(MediaError::UnsupportedFormat {
                format: format!("{:?} has no memory representation", format),
            })
        }
    }
    Ok(out.freeze())
}

/// Read one sample, narrowing 10-bit little-endian values to 8 bits
#[inline]
fn sample(data: &[u8], stride: usize, x: usize, y: usize, high_bit_depth: bool) -> u8 {
    if high_bit_depth {
        let i = y * stride + x * 2;
        let value = u16::from_le_bytes([data[i], data[i + 1]]);
        (value >> 2).min(255) as u8
    } else {
        data[y * stride + x]
    }
}

fn planar_to_i420(src: &PixelBuffer, out: &mut BufferLease) {
    let format = src.format();
    let high = format.is_high_bit_depth();
    let (x_shift, y_shift) = format.chroma_shift();
    let w = src.width() as usize;
    let h = src.height() as usize;

    let y_src = src.data(0);
    let y_stride = src.stride(0);
    let dst_stride = out.stride(0);
    let dst = out.plane_mut(0);
    for row in 0..h {
        for col in 0..w {
            dst[row * dst_stride + col] = sample(y_src, y_stride, col, row, high);
        }
    }

    let chroma_w = subsampled(src.width(), 1) as usize;
    let chroma_h = subsampled(src.height(), 1) as usize;
    let src_max_x = subsampled(src.width(), x_shift) as usize - 1;
    let src_max_y = subsampled(src.height(), y_shift) as usize - 1;

    for plane in 1..3 {
        let data = src.data(plane);
        let stride = src.stride(plane);
        let dst_stride = out.stride(plane);
        let dst = out.plane_mut(plane);

        for cy in 0..chroma_h {
            for cx in 0..chroma_w {
                let mut sum = 0u32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let lx = (2 * cx + dx).min(w - 1);
                        let ly = (2 * cy + dy).min(h - 1);
                        let sx = (lx >> x_shift).min(src_max_x);
                        let sy = (ly >> y_shift).min(src_max_y);
                        sum += sample(data, stride, sx, sy, high) as u32;
                    }
                }
                dst[cy * dst_stride + cx] = ((sum + 2) / 4) as u8;
            }
        }
    }
}

fn nv12_to_i420(src: &PixelBuffer, out: &mut BufferLease) {
    let w = src.width() as usize;
    let h = src.height() as usize;

    let y_src = src.data(0);
    let y_stride = src.stride(0);
    let dst_stride = out.stride(0);
    let dst = out.plane_mut(0);
    for row in 0..h {
        dst[row * dst_stride..row * dst_stride + w]
            .copy_from_slice(&y_src[row * y_stride..row * y_stride + w]);
    }

    let chroma_w = subsampled(src.width(), 1) as usize;
    let chroma_h = subsampled(src.height(), 1) as usize;
    let uv = src.data(1);
    let uv_stride = src.stride(1);

    for (plane, channel) in [(1, 0), (2, 1)] {
        let dst_stride = out.stride(plane);
        let dst = out.plane_mut(plane);
        for cy in 0..chroma_h {
            for cx in 0..chroma_w {
                dst[cy * dst_stride + cx] = uv[cy * uv_stride + cx * 2 + channel];
            }
        }
    }
}

/// Byte offsets of (R, G, B) within one packed pixel
fn rgb_offsets(format: PixelFormat) -> (usize, usize, usize) {
    match format {
        PixelFormat::Bgr24 | PixelFormat::Bgra => (2, 1, 0),
        PixelFormat::Argb => (1, 2, 3),
        _ => (0, 1, 2),
    }
}

/// BT.601 RGB to YUV, fixed-point
#[inline]
pub(crate) fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as i32;
    let g = g as i32;
    let b = b as i32;

    let y = (306 * r + 601 * g + 117 * b) >> 10;
    let u = ((-173 * r - 339 * g + 512 * b) >> 10) + 128;
    let v = ((512 * r - 429 * g - 83 * b) >> 10) + 128;

    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

fn packed_to_i420(src: &PixelBuffer, out: &mut BufferLease) {
    let format = src.format();
    let bpp = format.bytes_per_sample();
    let (ro, go, bo) = rgb_offsets(format);
    let w = src.width() as usize;
    let h = src.height() as usize;
    let data = src.data(0);
    let stride = src.stride(0);

    let pixel = |col: usize, row: usize| {
        let i = row * stride + col * bpp;
        rgb_to_yuv(data[i + ro], data[i + go], data[i + bo])
    };

    let dst_stride = out.stride(0);
    let dst = out.plane_mut(0);
    for row in 0..h {
        for col in 0..w {
            dst[row * dst_stride + col] = pixel(col, row).0;
        }
    }

    let chroma_w = subsampled(src.width(), 1) as usize;
    let chroma_h = subsampled(src.height(), 1) as usize;
    let mut u_plane = vec![0u8; chroma_w * chroma_h];
    let mut v_plane = vec![0u8; chroma_w * chroma_h];

    for cy in 0..chroma_h {
        for cx in 0..chroma_w {
            let mut u_sum = 0u32;
            let mut v_sum = 0u32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let (_, u, v) = pixel((2 * cx + dx).min(w - 1), (2 * cy + dy).min(h - 1));
                    u_sum += u as u32;
                    v_sum += v as u32;
                }
            }
            u_plane[cy * chroma_w + cx] = ((u_sum + 2) / 4) as u8;
            v_plane[cy * chroma_w + cx] = ((v_sum + 2) / 4) as u8;
        }
    }

    for (plane, values) in [(1, &u_plane), (2, &v_plane)] {
        let dst_stride = out.stride(plane);
        let dst = out.plane_mut(plane);
        for row in 0..chroma_h {
            dst[row * dst_stride..row * dst_stride + chroma_w]
                .copy_from_slice(&values[row * chroma_w..(row + 1) * chroma_w]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_yuv_reference_colors() {
        assert_eq!(rgb_to_yuv(128, 128, 128), (128, 128, 128));
        assert_eq!(rgb_to_yuv(255, 255, 255).0, 255);
        assert_eq!(rgb_to_yuv(0, 0, 0).0, 0);
        assert_eq!(rgb_to_yuv(255, 0, 0), (76, 84, 255));
    }

    #[test]
    fn test_bgra_channel_order() {
        let red_bgra: Vec<u8> = [0u8, 0, 255, 255].repeat(4);
        let buffer = PixelBuffer::from_vec(PixelFormat::Bgra, 2, 2, red_bgra).unwrap();
        let i420 = to_i420(&buffer).unwrap();
        assert_eq!(i420.data(0), &[76, 76, 76, 76]);
        assert_eq!(i420.data(1), &[84]);
        assert_eq!(i420.data(2), &[255]);
    }

    #[test]
    fn test_i422_chroma_is_averaged_vertically() {
        let mut data = vec![0u8; PixelFormat::I422.buffer_size(4, 2)];
        // Y: 8 bytes, U: 2x2, V: 2x2
        data[8..12].copy_from_slice(&[10, 20, 30, 40]);
        data[12..16].copy_from_slice(&[50, 50, 50, 50]);
        let buffer = PixelBuffer::from_vec(PixelFormat::I422, 4, 2, data).unwrap();

        let i420 = to_i420(&buffer).unwrap();
        assert_eq!(i420.data(1), &[20, 30]);
        assert_eq!(i420.data(2), &[50, 50]);
    }

    #[test]
    fn test_ten_bit_samples_are_narrowed() {
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&1023u16.to_le_bytes());
        }
        data.extend_from_slice(&512u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        let buffer = PixelBuffer::from_vec(PixelFormat::I010, 2, 2, data).unwrap();

        let i420 = to_i420(&buffer).unwrap();
        assert_eq!(i420.data(0), &[255, 255, 255, 255]);
        assert_eq!(i420.data(1), &[128]);
        assert_eq!(i420.data(2), &[0]);
    }

    #[test]
    fn test_nv12_chroma_is_deinterleaved() {
        let mut data = vec![16u8; PixelFormat::Nv12.buffer_size(4, 2)];
        data[8..12].copy_from_slice(&[1, 2, 3, 4]);
        let buffer = PixelBuffer::from_vec(PixelFormat::Nv12, 4, 2, data).unwrap();

        let i420 = to_i420(&buffer).unwrap();
        assert_eq!(i420.data(0), &[16; 8]);
        assert_eq!(i420.data(1), &[1, 3]);
        assert_eq!(i420.data(2), &[2, 4]);
    }

    #[test]
    fn test_odd_dimensions() {
        let data = vec![128u8; PixelFormat::Rgb24.buffer_size(3, 3)];
        let buffer = PixelBuffer::from_vec(PixelFormat::Rgb24, 3, 3, data).unwrap();
        let i420 = to_i420(&buffer).unwrap();
        assert_eq!(i420.byte_size(0), 9);
        assert_eq!(i420.byte_size(1), 4);
        assert!(i420.data(1).iter().all(|&v| v == 128));
    }
}
