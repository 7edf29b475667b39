//! Color model conversions and luminance contrast stretching.
//!
//! All conversions use the 8-bit conventions common to machine-vision
//! toolkits:
//!
//! - **YCrCb**: `Y = 0.299 R + 0.587 G + 0.114 B`,
//!   `Cr = 0.713 (R - Y) + 128`, `Cb = 0.564 (B - Y) + 128`.
//! - **HSV**: `V = max(R, G, B)`, `S = 255 (V - min) / V`, hue in
//!   half-degrees so a full turn fits in `0..=179`.
//!
//! [`enhance_luminance`] is the first processing stage: it stretches the
//! Y channel to the full `0..=255` range and leaves chroma untouched, so
//! the image gets brighter/darker contrast without shifting hue.

use image::{DynamicImage, Rgb};
use tracing::debug;

use crate::types::{Dimensions, GrayImage, Hsv, MAX_HUE, PipelineError, RgbImage};

/// Round and saturate a float sample into a byte.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Convert one RGB pixel to `[Y, Cr, Cb]`.
#[must_use]
pub fn rgb_to_ycrcb([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.114f32.mul_add(b, 0.299f32.mul_add(r, 0.587 * g));
    let cr = 0.713f32.mul_add(r - y, 128.0);
    let cb = 0.564f32.mul_add(b - y, 128.0);
    [to_u8(y), to_u8(cr), to_u8(cb)]
}

/// Convert one `[Y, Cr, Cb]` pixel back to RGB.
#[must_use]
pub fn ycrcb_to_rgb([y, cr, cb]: [u8; 3]) -> [u8; 3] {
    let y = f32::from(y);
    let cr = f32::from(cr) - 128.0;
    let cb = f32::from(cb) - 128.0;
    let r = 1.403f32.mul_add(cr, y);
    let g = (-0.344f32).mul_add(cb, (-0.714f32).mul_add(cr, y));
    let b = 1.773f32.mul_add(cb, y);
    [to_u8(r), to_u8(g), to_u8(b)]
}

/// Convert one RGB pixel to 8-bit HSV.
#[must_use]
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> Hsv {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = f32::from(max - min);

    let s = if max == 0 {
        0
    } else {
        to_u8(255.0 * chroma / f32::from(max))
    };

    let h = if max == min {
        0
    } else {
        let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
        let degrees = if max == r {
            60.0 * (gf - bf) / chroma
        } else if max == g {
            60.0f32.mul_add((bf - rf) / chroma, 120.0)
        } else {
            60.0f32.mul_add((rf - gf) / chroma, 240.0)
        };
        let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
        let half = to_u8(degrees / 2.0);
        // 359.x degrees rounds up to a full turn.
        if half > MAX_HUE { 0 } else { half }
    };

    Hsv { h, s, v: max }
}

/// Replicate a single-channel image into three identical channels.
#[must_use = "returns the three-channel image"]
pub fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Normalize any decoded image into 8-bit RGB.
///
/// Grayscale inputs are replicated across channels; alpha is dropped.
#[must_use = "returns the RGB image"]
pub fn to_rgb(image: &DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray_to_rgb(gray),
        other => other.to_rgb8(),
    }
}

/// Fail with [`PipelineError::InvalidInput`] on zero-area images.
pub(crate) fn ensure_non_empty(dimensions: Dimensions) -> Result<(), PipelineError> {
    if dimensions.is_empty() {
        return Err(PipelineError::InvalidInput);
    }
    Ok(())
}

/// Lookup table remapping `min..=max` onto `0..=255`.
fn stretch_table(min: u8, max: u8) -> [u8; 256] {
    let span = f32::from(max - min);
    std::array::from_fn(|v| {
        #[allow(clippy::cast_possible_truncation)]
        let v = v as u8;
        to_u8(f32::from(v.saturating_sub(min)) * 255.0 / span)
    })
}

/// Stretch the luminance channel of `image` to the full byte range.
///
/// The image is converted to YCrCb, the minimum and maximum Y over the
/// whole image are found, and every Y sample is remapped with
/// `round((y - min) * 255 / (max - min))`. Cr and Cb are kept as-is and
/// the result is converted back to RGB.
///
/// A uniform image (`min == max`) cannot be stretched; it is returned
/// unchanged.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the image has zero area.
pub fn enhance_luminance(image: &RgbImage) -> Result<RgbImage, PipelineError> {
    ensure_non_empty(Dimensions::of(image))?;

    let ycc: Vec<[u8; 3]> = image.pixels().map(|p| rgb_to_ycrcb(p.0)).collect();
    let (min, max) = ycc
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

    if min == max {
        debug!(luminance = min, "uniform luminance, skipping stretch");
        return Ok(image.clone());
    }

    debug!(min, max, "stretching luminance");
    let table = stretch_table(min, max);
    let mut enhanced = RgbImage::new(image.width(), image.height());
    for (dst, [y, cr, cb]) in enhanced.pixels_mut().zip(ycc) {
        *dst = Rgb(ycrcb_to_rgb([table[usize::from(y)], cr, cb]));
    }
    Ok(enhanced)
}

/// Extract the Y channel of `image` as a grayscale buffer.
#[must_use = "returns the luminance channel"]
pub fn luminance(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([rgb_to_ycrcb(image.get_pixel(x, y).0)[0]])
    })
}
