//! HSV range segmentation.
//!
//! Produces the binary mask that the morphology stage and the UI work
//! from: a pixel is set when all three of its HSV components fall inside
//! the configured inclusive range.

use tracing::debug;

use crate::color::{ensure_non_empty, rgb_to_hsv};
use crate::mask;
use crate::types::{Dimensions, GrayImage, HsvRange, PipelineError, RgbImage};

/// Threshold `image` in HSV space against `range`.
///
/// Hue upper bounds above 179 are clamped before comparing, so a range
/// built by hand behaves the same as one built with [`HsvRange::new`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the image has zero area.
/// Returns [`PipelineError::InvalidRange`] if any lower bound exceeds its
/// upper bound.
pub fn threshold_hsv(image: &RgbImage, range: &HsvRange) -> Result<GrayImage, PipelineError> {
    ensure_non_empty(Dimensions::of(image))?;
    let range = HsvRange::new(range.lower, range.upper);
    range.validate()?;

    let segmented = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        mask::pixel(range.contains(rgb_to_hsv(image.get_pixel(x, y).0)))
    });

    debug!(
        lower = %range.lower,
        upper = %range.upper,
        set = mask::count_set(&segmented),
        "HSV threshold applied",
    );
    Ok(segmented)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::color::rgb_to_hsv;
    use crate::mask::{MASK_SET, MASK_UNSET};
    use crate::types::Hsv;

    /// Left half mid-green (inside the default range), right half warm
    /// crust brown (outside it).
    fn half_green_image() -> RgbImage {
        RgbImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgb([60, 150, 60])
            } else {
                Rgb([190, 140, 80])
            }
        })
    }

    #[test]
    fn set_iff_all_components_in_range() {
        let img = half_green_image();
        let range = HsvRange::default();
        let mask = threshold_hsv(&img, &range).unwrap();
        for (x, y, p) in mask.enumerate_pixels() {
            let expected = range.contains(rgb_to_hsv(img.get_pixel(x, y).0));
            assert_eq!(p.0[0] == MASK_SET, expected, "pixel ({x}, {y})");
        }
        assert_eq!(mask.get_pixel(2, 2).0[0], MASK_SET);
        assert_eq!(mask.get_pixel(15, 2).0[0], MASK_UNSET);
    }

    #[test]
    fn output_is_binary_and_same_size() {
        let img = RgbImage::from_fn(13, 7, |x, y| {
            Rgb([
                u8::try_from(x * 19).unwrap(),
                u8::try_from(y * 35).unwrap(),
                u8::try_from((x + y) * 9).unwrap(),
            ])
        });
        let mask = threshold_hsv(&img, &HsvRange::default()).unwrap();
        assert_eq!(mask.dimensions(), (13, 7));
        assert!(
            mask.pixels()
                .all(|p| p.0[0] == MASK_SET || p.0[0] == MASK_UNSET)
        );
    }

    #[test]
    fn bounds_are_inclusive() {
        let img = RgbImage::from_fn(1, 1, |_, _| Rgb([0, 255, 0]));
        let exact = rgb_to_hsv([0, 255, 0]);
        let range = HsvRange::new(exact, exact);
        let mask = threshold_hsv(&img, &range).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], MASK_SET);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let img = half_green_image();
        let range = HsvRange {
            lower: Hsv::new(100, 50, 30),
            upper: Hsv::new(40, 255, 200),
        };
        assert!(matches!(
            threshold_hsv(&img, &range),
            Err(PipelineError::InvalidRange { channel: "hue", .. })
        ));
    }

    #[test]
    fn zero_area_is_invalid_input() {
        assert!(matches!(
            threshold_hsv(&RgbImage::new(4, 0), &HsvRange::default()),
            Err(PipelineError::InvalidInput)
        ));
    }

    #[test]
    fn out_of_range_hue_bound_is_clamped() {
        let img = RgbImage::from_fn(1, 1, |_, _| Rgb([255, 0, 1]));
        let range = HsvRange {
            lower: Hsv { h: 0, s: 0, v: 0 },
            upper: Hsv { h: 250, s: 255, v: 255 },
        };
        let mask = threshold_hsv(&img, &range).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], MASK_SET);
    }
}
