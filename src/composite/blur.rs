use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::{imageops, Rgba, RgbaImage};

/// A blur primitive supplied by the host platform (GPU filter, vendor SDK...).
pub trait PlatformBlur: Send + Sync {
    fn name(&self) -> &'static str;

    /// Gaussian-equivalent blur at the given sigma, same dimensions out.
    fn blur(&self, image: &RgbaImage, sigma: f32) -> RgbaImage;
}

/// True Gaussian from the `image` crate, used when the host registers nothing faster.
pub struct ImageGaussian;

impl PlatformBlur for ImageGaussian {
    fn name(&self) -> &'static str {
        "image-gaussian"
    }

    fn blur(&self, image: &RgbaImage, sigma: f32) -> RgbaImage {
        imageops::blur(image, sigma)
    }
}

/// What the operator asked for; resolved once into a [`BlurStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlurChoice {
    /// Platform primitive when one is registered, box approximation otherwise.
    #[default]
    Auto,
    Gaussian,
    Box,
}

impl FromStr for BlurChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gaussian" | "hardware" => Ok(Self::Gaussian),
            "box" => Ok(Self::Box),
            other => Err(format!("unknown blur strategy '{other}' (auto, gaussian, box)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurSettings {
    /// Gaussian sigma at native resolution.
    pub sigma: f32,
    pub box_downscale: u32,
    pub box_radius: u32,
}

impl Default for BlurSettings {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            box_downscale: 4,
            box_radius: 2,
        }
    }
}

/// Background blur, fixed for the lifetime of the pipeline.
#[derive(Clone)]
pub enum BlurStrategy {
    Platform {
        primitive: Arc<dyn PlatformBlur>,
        sigma: f32,
    },
    /// Degraded path: downscale, running-sum box blur, upscale.
    BoxApprox { downscale: u32, radius: u32 },
}

impl fmt::Debug for BlurStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform { primitive, sigma } => f
                .debug_struct("Platform")
                .field("primitive", &primitive.name())
                .field("sigma", sigma)
                .finish(),
            Self::BoxApprox { downscale, radius } => f
                .debug_struct("BoxApprox")
                .field("downscale", downscale)
                .field("radius", radius)
                .finish(),
        }
    }
}

impl BlurStrategy {
    pub fn select(
        choice: BlurChoice,
        platform: Option<Arc<dyn PlatformBlur>>,
        settings: BlurSettings,
    ) -> Self {
        let strategy = match (choice, platform) {
            (BlurChoice::Box, _) | (BlurChoice::Auto, None) => Self::BoxApprox {
                downscale: settings.box_downscale.max(1),
                radius: settings.box_radius,
            },
            (BlurChoice::Auto | BlurChoice::Gaussian, Some(primitive)) => Self::Platform {
                primitive,
                sigma: settings.sigma,
            },
            (BlurChoice::Gaussian, None) => Self::Platform {
                primitive: Arc::new(ImageGaussian),
                sigma: settings.sigma,
            },
        };
        tracing::info!("background blur strategy: {strategy:?}");
        strategy
    }

    pub fn apply(&self, image: &RgbaImage) -> RgbaImage {
        let _span = tracing::debug_span!("background_blur").entered();
        match self {
            Self::Platform { primitive, sigma } => primitive.blur(image, *sigma),
            Self::BoxApprox { downscale, radius } => box_blur_approx(image, *downscale, *radius),
        }
    }
}

fn box_blur_approx(image: &RgbaImage, downscale: u32, radius: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let small_w = (width / downscale).max(1);
    let small_h = (height / downscale).max(1);

    let small = imageops::resize(image, small_w, small_h, imageops::FilterType::Triangle);
    let blurred = box_blur(&small, radius as usize);
    imageops::resize(&blurred, width, height, imageops::FilterType::Triangle)
}

/// Separable running-sum box blur; edges average over the in-bounds samples.
pub fn box_blur(image: &RgbaImage, radius: usize) -> RgbaImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if radius == 0 || w == 0 || h == 0 {
        return image.clone();
    }

    let src = image.as_raw();
    let mut horizontal = vec![0u8; src.len()];
    for y in 0..h {
        let row = &src[y * w * 4..(y + 1) * w * 4];
        let out = &mut horizontal[y * w * 4..(y + 1) * w * 4];
        running_sum(w, radius, |i| &row[i * 4..i * 4 + 3], |i, px| {
            out[i * 4..i * 4 + 3].copy_from_slice(&px);
            out[i * 4 + 3] = 255;
        });
    }

    let mut out = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    for x in 0..w {
        running_sum(
            h,
            radius,
            |i| &horizontal[(i * w + x) * 4..(i * w + x) * 4 + 3],
            |i, px| out.put_pixel(x as u32, i as u32, Rgba([px[0], px[1], px[2], 255])),
        );
    }
    out
}

fn running_sum<'a>(
    len: usize,
    radius: usize,
    sample: impl Fn(usize) -> &'a [u8],
    mut write: impl FnMut(usize, [u8; 3]),
) {
    let mut sum = [0u32; 3];
    let mut count = 0u32;
    let add = |sum: &mut [u32; 3], px: &[u8], sign: i64| {
        for c in 0..3 {
            sum[c] = (i64::from(sum[c]) + sign * i64::from(px[c])) as u32;
        }
    };

    for i in 0..radius.min(len) {
        add(&mut sum, sample(i), 1);
        count += 1;
    }
    for i in 0..len {
        let entering = i + radius;
        if entering < len {
            add(&mut sum, sample(entering), 1);
            count += 1;
        }
        if i > radius {
            add(&mut sum, sample(i - radius - 1), -1);
            count -= 1;
        }
        write(i, sum.map(|s| (s / count) as u8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;

    impl PlatformBlur for Identity {
        fn name(&self) -> &'static str {
            "identity"
        }

        fn blur(&self, image: &RgbaImage, _sigma: f32) -> RgbaImage {
            image.clone()
        }
    }

    #[test]
    fn auto_prefers_platform_primitive() {
        let platform: Arc<dyn PlatformBlur> = Arc::new(Identity);
        let strategy = BlurStrategy::select(BlurChoice::Auto, Some(platform), BlurSettings::default());
        assert!(matches!(strategy, BlurStrategy::Platform { .. }));
        let fallback = BlurStrategy::select(BlurChoice::Auto, None, BlurSettings::default());
        assert!(matches!(fallback, BlurStrategy::BoxApprox { downscale: 4, radius: 2 }));
    }

    #[test]
    fn box_blur_matches_brute_force() {
        let image = RgbaImage::from_fn(7, 5, |x, y| {
            Rgba([(x * 30) as u8, (y * 40) as u8, ((x + y) * 13) as u8, 255])
        });
        let radius = 2i64;
        let fast = box_blur(&image, radius as usize);
        for y in 0..5i64 {
            for x in 0..7i64 {
                // Horizontal pass first, with truncating division, like the fast path.
                let column_values = |yy: i64| -> [u32; 3] {
                    let mut sum = [0u32; 3];
                    let mut n = 0;
                    for dx in -radius..=radius {
                        let nx = x + dx;
                        if (0..7).contains(&nx) {
                            let px = image.get_pixel(nx as u32, yy as u32);
                            for c in 0..3 {
                                sum[c] += u32::from(px[c]);
                            }
                            n += 1;
                        }
                    }
                    sum.map(|s| s / n)
                };
                let mut sum = [0u32; 3];
                let mut n = 0;
                for dy in -radius..=radius {
                    let ny = y + dy;
                    if (0..5).contains(&ny) {
                        let v = column_values(ny);
                        for c in 0..3 {
                            sum[c] += v[c];
                        }
                        n += 1;
                    }
                }
                let expected = sum.map(|s| (s / n) as u8);
                let got = fast.get_pixel(x as u32, y as u32);
                assert_eq!([got[0], got[1], got[2]], expected, "at ({x}, {y})");
            }
        }
    }

    #[test]
    fn box_approx_keeps_dimensions_and_flattens_detail() {
        let image = RgbaImage::from_fn(64, 32, |x, _| {
            if x % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        let blurred = BlurStrategy::BoxApprox { downscale: 4, radius: 2 }.apply(&image);
        assert_eq!(blurred.dimensions(), (64, 32));
        let center = blurred.get_pixel(32, 16);
        assert!(center[0] > 64 && center[0] < 192, "center = {:?}", center);
    }

    #[test]
    fn blur_choice_parses() {
        assert_eq!("BOX".parse::<BlurChoice>(), Ok(BlurChoice::Box));
        assert_eq!("hardware".parse::<BlurChoice>(), Ok(BlurChoice::Gaussian));
        assert!("median".parse::<BlurChoice>().is_err());
    }
}
