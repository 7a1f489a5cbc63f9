mod blend;
mod blur;

pub use blend::{blend, fit_cover, fit_mask, CompositeRoute};
pub use blur::{box_blur, BlurChoice, BlurSettings, BlurStrategy, ImageGaussian, PlatformBlur};

use image::RgbaImage;

use crate::mask::AlphaMask;

/// What goes behind the subject for one frame.
#[derive(Debug, Clone, Copy)]
pub enum Backdrop<'a> {
    /// A blurred copy of the frame itself.
    Blur,
    /// A still image; scaled and cropped to the frame if it does not match.
    Image(&'a RgbaImage),
}

pub struct Compositor {
    blur: BlurStrategy,
    route: CompositeRoute,
}

impl Compositor {
    pub fn new(blur: BlurStrategy, route: CompositeRoute) -> Self {
        Self { blur, route }
    }

    pub fn blur_strategy(&self) -> &BlurStrategy {
        &self.blur
    }

    /// Composite `original` over `backdrop`, keeping the original where `mask` is 1.
    ///
    /// A mask at a different resolution is resampled to the frame first.
    pub fn composite(
        &self,
        original: &RgbaImage,
        backdrop: Backdrop<'_>,
        mask: &AlphaMask,
    ) -> RgbaImage {
        let _span = tracing::debug_span!("composite").entered();
        let (width, height) = original.dimensions();

        let scaled_mask;
        let mask = if mask.dimensions() == (width, height) {
            mask
        } else {
            scaled_mask = fit_mask(mask, width, height);
            &scaled_mask
        };

        let fitted;
        let background = match backdrop {
            Backdrop::Image(image) if image.dimensions() == (width, height) => image,
            Backdrop::Image(image) => {
                fitted = fit_cover(image, width, height);
                &fitted
            }
            Backdrop::Blur => {
                fitted = self.blur.apply(original);
                &fitted
            }
        };

        blend(original, background, mask, self.route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[test]
    fn still_image_is_fitted_before_blending() {
        let compositor = Compositor::new(
            BlurStrategy::BoxApprox { downscale: 4, radius: 2 },
            CompositeRoute::SinglePass,
        );
        let original = RgbaImage::from_pixel(8, 6, Rgba([10, 20, 30, 255]));
        let still = RgbaImage::from_pixel(3, 3, Rgba([200, 100, 0, 255]));
        let mask = AlphaMask::from_pixel(2, 2, Luma([0.0]));
        let out = compositor.composite(&original, Backdrop::Image(&still), &mask);
        assert_eq!(out.dimensions(), (8, 6));
        assert!(out.pixels().all(|p| p.0 == [200, 100, 0, 255]));
    }

    #[test]
    fn blur_backdrop_of_flat_frame_is_the_frame() {
        let compositor = Compositor::new(
            BlurStrategy::BoxApprox { downscale: 4, radius: 2 },
            CompositeRoute::Layered,
        );
        let original = RgbaImage::from_pixel(16, 8, Rgba([90, 60, 30, 255]));
        let mask = AlphaMask::from_pixel(16, 8, Luma([0.3]));
        let out = compositor.composite(&original, Backdrop::Blur, &mask);
        assert_eq!(out, original);
    }
}
