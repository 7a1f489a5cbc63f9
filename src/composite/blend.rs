use image::{imageops, Rgba, RgbaImage};

use crate::mask::AlphaMask;

/// How the blend is carried out. Both routes obey
/// `out = original * m + background * (1 - m)` per colour channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeRoute {
    /// One pass over the three inputs.
    #[default]
    SinglePass,
    /// Draw background, cut it by the mask, draw the original underneath.
    Layered,
}

/// Blend `original` over `background` using `mask`.
///
/// All three inputs must share dimensions; [`super::Compositor`] scales
/// the background and mask beforehand.
pub fn blend(
    original: &RgbaImage,
    background: &RgbaImage,
    mask: &AlphaMask,
    route: CompositeRoute,
) -> RgbaImage {
    debug_assert_eq!(original.dimensions(), background.dimensions());
    debug_assert_eq!(original.dimensions(), mask.dimensions());

    match route {
        CompositeRoute::SinglePass => single_pass(original, background, mask),
        CompositeRoute::Layered => layered(original, background, mask),
    }
}

fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn single_pass(original: &RgbaImage, background: &RgbaImage, mask: &AlphaMask) -> RgbaImage {
    RgbaImage::from_fn(original.width(), original.height(), |x, y| {
        let m = mask.get_pixel(x, y)[0].clamp(0.0, 1.0);
        let o = original.get_pixel(x, y);
        let b = background.get_pixel(x, y);
        let mut out = [0u8, 0, 0, 255];
        for c in 0..3 {
            out[c] = to_channel(f32::from(o[c]) * m + f32::from(b[c]) * (1.0 - m));
        }
        Rgba(out)
    })
}

/// Premultiplied canvas mirroring a 2D engine: SRC, then DST_OUT, then DST_OVER.
fn layered(original: &RgbaImage, background: &RgbaImage, mask: &AlphaMask) -> RgbaImage {
    let (width, height) = original.dimensions();
    let len = width as usize * height as usize;

    // Draw the background opaque.
    let mut color: Vec<[f32; 3]> = background
        .pixels()
        .map(|p| [f32::from(p[0]), f32::from(p[1]), f32::from(p[2])])
        .collect();
    let mut alpha = vec![1.0f32; len];

    // DST_OUT with the mask as source alpha: keep the background where the subject is not.
    for ((c, a), m) in color.iter_mut().zip(alpha.iter_mut()).zip(mask.pixels()) {
        let keep = 1.0 - m[0].clamp(0.0, 1.0);
        c.iter_mut().for_each(|v| *v *= keep);
        *a *= keep;
    }

    // DST_OVER with the opaque original: it shows through wherever the canvas is transparent.
    for ((c, a), o) in color.iter_mut().zip(alpha.iter_mut()).zip(original.pixels()) {
        let through = 1.0 - *a;
        for (ch, v) in c.iter_mut().enumerate() {
            *v += f32::from(o[ch]) * through;
        }
        *a += through;
    }

    let mut out = RgbaImage::new(width, height);
    for (px, c) in out.pixels_mut().zip(&color) {
        *px = Rgba([to_channel(c[0]), to_channel(c[1]), to_channel(c[2]), 255]);
    }
    out
}

/// Scale `image` to cover `width x height` keeping aspect ratio, then centre-crop.
pub fn fit_cover(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (src_w, src_h) = image.dimensions();
    if (src_w, src_h) == (width, height) {
        return image.clone();
    }
    if src_w == 0 || src_h == 0 {
        return RgbaImage::new(width, height);
    }

    let scale = f64::max(
        f64::from(width) / f64::from(src_w),
        f64::from(height) / f64::from(src_h),
    );
    let scaled_w = ((f64::from(src_w) * scale).ceil() as u32).max(width);
    let scaled_h = ((f64::from(src_h) * scale).ceil() as u32).max(height);

    let scaled = imageops::resize(image, scaled_w, scaled_h, imageops::FilterType::Triangle);
    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

/// Bring a mask of any resolution to the frame's size with bilinear filtering.
pub fn fit_mask(mask: &AlphaMask, width: u32, height: u32) -> AlphaMask {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    imageops::resize(mask, width, height, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn pattern(seed: u8) -> RgbaImage {
        RgbaImage::from_fn(6, 4, |x, y| {
            let v = (x as u8 * 40).wrapping_add(y as u8 * 17).wrapping_add(seed);
            Rgba([v, v.wrapping_mul(3), 255 - v, 255])
        })
    }

    fn uniform_mask(value: f32) -> AlphaMask {
        AlphaMask::from_pixel(6, 4, Luma([value]))
    }

    #[test]
    fn full_mask_yields_original() {
        let (o, b) = (pattern(0), pattern(99));
        for route in [CompositeRoute::SinglePass, CompositeRoute::Layered] {
            assert_eq!(blend(&o, &b, &uniform_mask(1.0), route), o);
        }
    }

    #[test]
    fn empty_mask_yields_background() {
        let (o, b) = (pattern(0), pattern(99));
        for route in [CompositeRoute::SinglePass, CompositeRoute::Layered] {
            assert_eq!(blend(&o, &b, &uniform_mask(0.0), route), b);
        }
    }

    #[test]
    fn half_mask_averages_channels() {
        let o = RgbaImage::from_pixel(6, 4, Rgba([200, 100, 10, 255]));
        let b = RgbaImage::from_pixel(6, 4, Rgba([100, 50, 30, 255]));
        for route in [CompositeRoute::SinglePass, CompositeRoute::Layered] {
            let out = blend(&o, &b, &uniform_mask(0.5), route);
            for px in out.pixels() {
                assert_eq!(px.0, [150, 75, 20, 255]);
            }
        }
    }

    #[test]
    fn routes_agree_on_graded_masks() {
        let (o, b) = (pattern(3), pattern(120));
        let mask = AlphaMask::from_fn(6, 4, |x, y| Luma([(x * 4 + y) as f32 / 23.0]));
        let single = blend(&o, &b, &mask, CompositeRoute::SinglePass);
        let layered = blend(&o, &b, &mask, CompositeRoute::Layered);
        for (s, l) in single.pixels().zip(layered.pixels()) {
            for c in 0..4 {
                assert!((i16::from(s[c]) - i16::from(l[c])).abs() <= 1);
            }
        }
    }

    #[test]
    fn cover_fit_crops_the_long_axis() {
        // Left half red, right half blue, 8x2 into a 2x2 frame keeps the centre seam.
        let image = RgbaImage::from_fn(8, 2, |x, _| {
            if x < 4 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let fitted = fit_cover(&image, 2, 2);
        assert_eq!(fitted.dimensions(), (2, 2));
        assert!(fitted.get_pixel(0, 0)[0] > fitted.get_pixel(1, 0)[0]);
    }

    #[test]
    fn mask_is_scaled_to_frame() {
        let mask = AlphaMask::from_pixel(3, 2, Luma([1.0]));
        let fitted = fit_mask(&mask, 12, 8);
        assert_eq!(fitted.dimensions(), (12, 8));
        assert!(fitted.pixels().all(|p| (p[0] - 1.0).abs() < 1e-4));
    }
}
