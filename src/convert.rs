//! Conversion between the I420 transport layout and packed RGBA.
//!
//! Luma/chroma use BT.601 studio range. Decoding looks up chroma with
//! integer-divide-by-two addressing, so every 2x2 luma block shares one
//! chroma pair. Encoding averages each 2x2 block of RGB before deriving
//! its chroma pair.

use image::{imageops, RgbaImage};

use crate::error::{try_alloc, ConversionError};
use crate::frame::{chroma_dimensions, I420Frame, Plane, Rotation};

/// Decode a planar frame into a packed RGBA image (alpha is always opaque).
///
/// The input is left untouched; a new buffer is allocated for the output.
pub fn to_packed(frame: &I420Frame) -> Result<RgbaImage, ConversionError> {
    let _span = tracing::debug_span!("to_packed").entered();

    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(ConversionError::EmptyFrame { width, height });
    }
    let (Some(y_plane), Some(u_plane), Some(v_plane)) = (frame.y(), frame.u(), frame.v()) else {
        return Err(ConversionError::Released);
    };

    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_dimensions(width, height);
    check_plane("Y", y_plane, w, h)?;
    check_plane("U", u_plane, cw, ch)?;
    check_plane("V", v_plane, cw, ch)?;

    let mut out = try_alloc::<u8>("packed frame", w * h * 4)?;

    for y in 0..h {
        let luma = y_plane.row(y, w);
        let u_row = u_plane.row(y / 2, cw);
        let v_row = v_plane.row(y / 2, cw);
        let dst = &mut out[y * w * 4..(y + 1) * w * 4];

        for x in 0..w {
            let [r, g, b] = yuv_to_rgb(luma[x], u_row[x / 2], v_row[x / 2]);
            let px = &mut dst[x * 4..x * 4 + 4];
            px.copy_from_slice(&[r, g, b, 255]);
        }
    }

    RgbaImage::from_raw(width, height, out).ok_or(ConversionError::EmptyFrame { width, height })
}

/// Encode a packed image into a tightly strided I420 frame.
pub fn to_planar(
    image: &RgbaImage,
    timestamp_ns: i64,
    rotation: Rotation,
) -> Result<I420Frame, ConversionError> {
    let _span = tracing::debug_span!("to_planar").entered();

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ConversionError::EmptyFrame { width, height });
    }

    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_dimensions(width, height);
    let src = image.as_raw();

    let mut luma = try_alloc::<u8>("luma plane", w * h)?;
    let mut u_plane = try_alloc::<u8>("chroma plane", cw * ch)?;
    let mut v_plane = try_alloc::<u8>("chroma plane", cw * ch)?;

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 4;
            luma[y * w + x] = rgb_to_luma(src[i], src[i + 1], src[i + 2]);
        }
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let mut sum = [0u32; 3];
            let mut count = 0u32;
            for y in (cy * 2)..((cy * 2 + 2).min(h)) {
                for x in (cx * 2)..((cx * 2 + 2).min(w)) {
                    let i = (y * w + x) * 4;
                    sum[0] += u32::from(src[i]);
                    sum[1] += u32::from(src[i + 1]);
                    sum[2] += u32::from(src[i + 2]);
                    count += 1;
                }
            }
            let avg = sum.map(|s| s as f32 / count as f32);
            let (u, v) = rgb_to_chroma(avg[0], avg[1], avg[2]);
            u_plane[cy * cw + cx] = u;
            v_plane[cy * cw + cx] = v;
        }
    }

    Ok(I420Frame::new(
        width,
        height,
        timestamp_ns,
        rotation,
        Plane::new(luma, w),
        Plane::new(u_plane, cw),
        Plane::new(v_plane, cw),
    ))
}

/// Turn a packed image upright according to the frame's rotation metadata.
pub fn apply_rotation(image: RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

fn check_plane(
    plane: &'static str,
    data: &Plane,
    row: usize,
    rows: usize,
) -> Result<(), ConversionError> {
    if data.data.is_empty() {
        return Err(ConversionError::ShortPlane {
            plane,
            stride: data.stride,
            required: row * rows,
            actual: 0,
        });
    }
    if data.stride < row {
        return Err(ConversionError::BadStride {
            plane,
            stride: data.stride,
            row,
        });
    }
    // The last row does not need trailing padding.
    let required = data.stride * (rows - 1) + row;
    if data.data.len() < required {
        return Err(ConversionError::ShortPlane {
            plane,
            stride: data.stride,
            required,
            actual: data.data.len(),
        });
    }
    Ok(())
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = (f32::from(y) - 16.0) * 1.164;
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;

    [
        clamp_channel(y + 1.596 * v),
        clamp_channel(y - 0.392 * u - 0.813 * v),
        clamp_channel(y + 2.017 * u),
    ]
}

fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    clamp_channel(0.257 * r + 0.504 * g + 0.098 * b + 16.0)
}

fn rgb_to_chroma(r: f32, g: f32, b: f32) -> (u8, u8) {
    let u = -0.148 * r - 0.291 * g + 0.439 * b + 128.0;
    let v = 0.439 * r - 0.368 * g - 0.071 * b + 128.0;
    (clamp_channel(u), clamp_channel(v))
}
