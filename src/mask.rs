//! Turns raw classifier output into a frame-sized alpha mask.
//!
//! Alpha semantics are fixed across the crate: 1.0 keeps the original
//! pixel (subject), 0.0 shows the substitute background. Classifier
//! polarity is normalized in [`decode`] and nowhere else.

use image::{imageops, ImageBuffer, Luma, Rgba, RgbaImage};
use thiserror::Error;

use crate::segmentation::{Polarity, RawMask, RawMaskData};

/// Per-pixel opacity in `[0, 1]`, carrying its own dimensions.
pub type AlphaMask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Interpolation used when the classifier resolution differs from the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resample {
    #[default]
    Bilinear,
    Lanczos,
    /// Cheapest; only meant for constrained devices.
    Nearest,
}

impl Resample {
    fn filter(self) -> imageops::FilterType {
        match self {
            Self::Bilinear => imageops::FilterType::Triangle,
            Self::Lanczos => imageops::FilterType::Lanczos3,
            Self::Nearest => imageops::FilterType::Nearest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskSettings {
    /// Confidence at the centre of the subject/background transition.
    pub threshold: f32,
    /// Width of the transition; zero gives a hard cut.
    pub softness: f32,
    /// Gaussian sigma, in mask pixels, applied at classifier resolution.
    pub pre_blur_sigma: f32,
    pub resample: Resample,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            softness: 0.15,
            pre_blur_sigma: 0.75,
            resample: Resample::Bilinear,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MaskDecodeError {
    #[error("raw mask has zero-sized dimensions ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("raw mask carries {actual} samples for {width}x{height}")]
    LengthMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },
}

pub struct MaskProcessor {
    settings: MaskSettings,
}

impl MaskProcessor {
    pub fn new(settings: MaskSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MaskSettings {
        &self.settings
    }

    /// Produce a `target_width x target_height` alpha mask.
    ///
    /// Never fails: a missing or unusable raw mask yields [`fallback_mask`].
    pub fn process(
        &self,
        raw: Option<&RawMask>,
        target_width: u32,
        target_height: u32,
    ) -> AlphaMask {
        let _span = tracing::debug_span!("mask_postprocess").entered();

        let Some(raw) = raw else {
            tracing::debug!("classifier returned no mask, using fallback ellipse");
            return fallback_mask(target_width, target_height);
        };
        let decoded = match decode(raw) {
            Ok(mask) => mask,
            Err(err) => {
                tracing::warn!("unusable classifier mask ({err}), using fallback ellipse");
                return fallback_mask(target_width, target_height);
            }
        };

        let blur_sigma = self.settings.pre_blur_sigma;
        let softened = if blur_sigma > 0.0 && decoded.width() > 1 && decoded.height() > 1 {
            gaussian_blur(&decoded, blur_sigma)
        } else {
            decoded
        };

        let mut scaled = if softened.dimensions() == (target_width, target_height) {
            softened
        } else {
            imageops::resize(
                &softened,
                target_width,
                target_height,
                self.settings.resample.filter(),
            )
        };

        let curve = EdgeCurve::new(self.settings.threshold, self.settings.softness);
        for px in scaled.pixels_mut() {
            px[0] = curve.apply(px[0]);
        }
        scaled
    }
}

impl Default for MaskProcessor {
    fn default() -> Self {
        Self::new(MaskSettings::default())
    }
}

/// Decode any raw encoding into a native-resolution mask with 1 = subject.
///
/// This is the single point where classifier polarity is corrected.
pub fn decode(raw: &RawMask) -> Result<AlphaMask, MaskDecodeError> {
    let (width, height) = (raw.width, raw.height);
    if width == 0 || height == 0 {
        return Err(MaskDecodeError::Empty { width, height });
    }
    let expected = width as usize * height as usize;
    if raw.len() != expected {
        return Err(MaskDecodeError::LengthMismatch {
            width,
            height,
            actual: raw.len(),
        });
    }

    let values: Vec<f32> = match &raw.data {
        RawMaskData::Category { codes, subject } => codes
            .iter()
            .map(|&code| if code == *subject { 1.0 } else { 0.0 })
            .collect(),
        RawMaskData::Confidence { values, polarity } => values
            .iter()
            .map(|&v| orient(if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }, *polarity))
            .collect(),
        RawMaskData::Alpha { values, polarity } => values
            .iter()
            .map(|&v| orient(f32::from(v) / 255.0, *polarity))
            .collect(),
    };

    ImageBuffer::from_raw(width, height, values).ok_or(MaskDecodeError::LengthMismatch {
        width,
        height,
        actual: raw.len(),
    })
}

fn orient(value: f32, polarity: Polarity) -> f32 {
    match polarity {
        Polarity::SubjectHigh => value,
        Polarity::SubjectLow => 1.0 - value,
    }
}

/// Separable Gaussian with clamped edges, so uniform masks stay uniform.
///
/// `imageops::blur` makes no promise about how it samples past the border.
/// The classifier mask is small and a subject touching the frame edge must
/// keep full alpha there, so border samples are repeated explicitly.
fn gaussian_blur(mask: &AlphaMask, sigma: f32) -> AlphaMask {
    let radius = (sigma * 3.0).ceil() as i64;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    let (w, h) = (mask.width() as i64, mask.height() as i64);
    let src = mask.as_raw();
    let mut horizontal = vec![0.0f32; src.len()];
    for y in 0..h {
        for x in 0..w {
            horizontal[(y * w + x) as usize] = kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let sx = (x + k as i64 - radius).clamp(0, w - 1);
                    weight * src[(y * w + sx) as usize]
                })
                .sum();
        }
    }

    AlphaMask::from_fn(mask.width(), mask.height(), |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let value: f32 = kernel
            .iter()
            .enumerate()
            .map(|(k, weight)| {
                let sy = (y + k as i64 - radius).clamp(0, h - 1);
                weight * horizontal[(sy * w + x) as usize]
            })
            .sum();
        Luma([value])
    })
}

/// Logistic transition around `threshold`, rescaled so 0 and 1 stay fixed.
///
/// This is not the plain logistic `1 / (1 + exp(-(x - t) / s))`: that never
/// reaches 0 or 1 (about 0.034 and 0.966 at the defaults), which would leave
/// a faint copy of the background over a solid subject. The output is
/// stretched by `(logistic(x) - logistic(0)) / (logistic(1) - logistic(0))`.
#[derive(Debug, Clone, Copy)]
struct EdgeCurve {
    threshold: f32,
    softness: f32,
    low: f32,
    span: f32,
}

impl EdgeCurve {
    fn new(threshold: f32, softness: f32) -> Self {
        let mut curve = Self {
            threshold,
            softness,
            low: 0.0,
            span: 1.0,
        };
        if softness > 0.0 {
            let low = curve.logistic(0.0);
            let high = curve.logistic(1.0);
            curve.low = low;
            curve.span = (high - low).max(f32::EPSILON);
        }
        curve
    }

    fn logistic(&self, x: f32) -> f32 {
        1.0 / (1.0 + (-(x - self.threshold) / self.softness).exp())
    }

    fn apply(&self, x: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);
        if self.softness <= 0.0 {
            return if x >= self.threshold { 1.0 } else { 0.0 };
        }
        ((self.logistic(x) - self.low) / self.span).clamp(0.0, 1.0)
    }
}

/// Head-and-shoulders ellipse used whenever segmentation yields nothing.
///
/// The geometry depends only on the dimensions, so the same size always
/// produces the same mask.
pub fn fallback_mask(width: u32, height: u32) -> AlphaMask {
    let (w, h) = (width as f32, height as f32);
    if width == 0 || height == 0 {
        return AlphaMask::new(width, height);
    }

    let aspect = w / h;
    let center_x = w * 0.5;
    // Slightly above centre for typical selfie framing.
    let center_y = h * 0.4;

    let base = w.min(h) * 0.35;
    let (sx, sy) = if aspect > 1.0 { (0.8, 1.2) } else { (1.0, 1.0) };
    let radius_x = (base * sx).clamp(w * 0.25, w * 0.4);
    let radius_y = (base * sy).clamp(h * 0.3, h * 0.5);

    AlphaMask::from_fn(width, height, |x, y| {
        let dx = (x as f32 + 0.5 - center_x) / radius_x;
        let dy = (y as f32 + 0.5 - center_y) / radius_y;
        Luma([if dx * dx + dy * dy <= 1.0 { 1.0 } else { 0.0 }])
    })
}

/// Grey visualization of a mask, white where the subject is kept.
pub fn mask_to_rgba(mask: &AlphaMask) -> RgbaImage {
    RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        let value = (mask.get_pixel(x, y)[0] * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgba([value, value, value, 255])
    })
}
