//! Binary mask helpers.
//!
//! Masks are single-channel [`GrayImage`]s holding only [`MASK_SET`]
//! and [`MASK_UNSET`]. Readers treat any non-zero sample as set so
//! masks from other sources still work.

use image::{Luma, Rgb};

use crate::types::{GrayImage, RgbImage};

/// Sample value of a set mask pixel.
pub const MASK_SET: u8 = u8::MAX;

/// Sample value of an unset mask pixel.
pub const MASK_UNSET: u8 = 0;

/// Mask pixel for a boolean membership test.
#[must_use]
pub const fn pixel(set: bool) -> Luma<u8> {
    Luma([if set { MASK_SET } else { MASK_UNSET }])
}

/// Number of set pixels in `mask`.
#[must_use]
pub fn count_set(mask: &GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] != MASK_UNSET)).sum()
}

/// Returns `true` if no pixel in `mask` is set.
#[must_use]
pub fn is_blank(mask: &GrayImage) -> bool {
    mask.pixels().all(|p| p.0[0] == MASK_UNSET)
}

/// Fraction of pixels set, in `0.0..=1.0`. Zero-area masks report 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coverage(mask: &GrayImage) -> f64 {
    let area = u64::from(mask.width()) * u64::from(mask.height());
    if area == 0 {
        return 0.0;
    }
    count_set(mask) as f64 / area as f64
}

/// Expand a mask to three channels for display or saving.
#[must_use = "returns the RGB rendering of the mask"]
pub fn to_rgb(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}
