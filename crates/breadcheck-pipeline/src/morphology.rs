//! Binary morphology with a rectangular structuring element.
//!
//! Erosion keeps a pixel set only when every pixel under the element is
//! set; dilation sets a pixel when any pixel under the element is set.
//! Opening (erode then dilate) removes specks smaller than the element,
//! closing (dilate then erode) fills gaps smaller than the element.
//!
//! Odd squares map onto imageproc's Chebyshev-norm operators; any other
//! rectangle runs through imageproc's mask-based grayscale operators.
//! Pixels outside the image are ignored: the border neither erodes nor
//! grows the mask.
//!
//! Every public operation refuses an all-zero mask with
//! [`PipelineError::EmptyMask`] and an unusable element with
//! [`PipelineError::InvalidConfig`]. Callers evaluate each operation against
//! the segmented mask directly rather than chaining them.

use std::fmt;

use imageproc::distance_transform::Norm;
use imageproc::morphology::{self as ops, Mask};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mask;
use crate::types::{GrayImage, PipelineError};

/// Rectangular structuring element.
///
/// The anchor sits at `(width / 2, height / 2)`, so odd sizes are
/// centered and even sizes lean one pixel toward the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuringElement {
    /// Kernel width in pixels.
    pub width: u32,
    /// Kernel height in pixels.
    pub height: u32,
}

impl StructuringElement {
    /// Largest supported side length.
    pub const MAX_SIDE: u32 = 511;

    /// Create a `width x height` rectangle.
    #[must_use]
    pub const fn rect(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Create a square element.
    #[must_use]
    pub const fn square(size: u32) -> Self {
        Self::rect(size, size)
    }

    /// Check that the element can be applied.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if either side is zero or
    /// longer than [`Self::MAX_SIDE`].
    pub fn validate(self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "structuring element must be at least 1x1, got {self}",
            )));
        }
        if self.width > Self::MAX_SIDE || self.height > Self::MAX_SIDE {
            return Err(PipelineError::InvalidConfig(format!(
                "structuring element sides are limited to {}, got {self}",
                Self::MAX_SIDE,
            )));
        }
        Ok(())
    }

    /// The imageproc operator equivalent to this element on a `width x
    /// height` mask.
    ///
    /// The Chebyshev operators saturate distances at `min(width + height,
    /// 255)`, so larger radii would erode a fully set mask; those fall
    /// back to the mask-based operators.
    fn kernel(self, (width, height): (u32, u32)) -> Result<Kernel, PipelineError> {
        self.validate()?;
        let saturation = width.saturating_add(height).min(u32::from(u8::MAX));
        if self.width == self.height
            && self.width % 2 == 1
            && self.width / 2 < saturation
            && let Ok(radius) = u8::try_from(self.width / 2)
        {
            return Ok(Kernel::Chebyshev(radius));
        }
        let anchor = |side: u32| {
            u8::try_from(side / 2).map_err(|_| {
                PipelineError::InvalidConfig(format!("structuring element {self} is too large"))
            })
        };
        let shape = GrayImage::from_pixel(self.width, self.height, mask::pixel(true));
        Ok(Kernel::Mask(Mask::from_image(
            &shape,
            anchor(self.width)?,
            anchor(self.height)?,
        )))
    }
}

impl Default for StructuringElement {
    fn default() -> Self {
        Self::square(crate::types::PipelineConfig::DEFAULT_KERNEL_SIZE)
    }
}

impl fmt::Display for StructuringElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Selects a morphology operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MorphOp {
    /// Shrink set regions.
    Erode,
    /// Grow set regions.
    Dilate,
    /// Erode then dilate.
    Open,
    /// Dilate then erode.
    Close,
}

impl MorphOp {
    /// All operations, in menu order.
    pub const ALL: [Self; 4] = [Self::Erode, Self::Dilate, Self::Open, Self::Close];

    /// Display name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Erode => "Erosion",
            Self::Dilate => "Dilation",
            Self::Open => "Opening",
            Self::Close => "Closing",
        }
    }

    /// Apply this operation to `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyMask`] if `mask` has no set pixels and
    /// [`PipelineError::InvalidConfig`] for an unusable `element`.
    pub fn apply(
        self,
        mask: &GrayImage,
        element: StructuringElement,
    ) -> Result<GrayImage, PipelineError> {
        match self {
            Self::Erode => erode(mask, element),
            Self::Dilate => dilate(mask, element),
            Self::Open => open(mask, element),
            Self::Close => close(mask, element),
        }
    }
}

impl fmt::Display for MorphOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How an element is handed to imageproc.
enum Kernel {
    /// Odd square of the given radius.
    Chebyshev(u8),
    /// Any other rectangle.
    Mask(Mask),
}

impl Kernel {
    fn erode(&self, mask: &GrayImage) -> GrayImage {
        match self {
            Self::Chebyshev(radius) => ops::erode(mask, Norm::LInf, *radius),
            Self::Mask(shape) => ops::grayscale_erode(mask, shape),
        }
    }

    fn dilate(&self, mask: &GrayImage) -> GrayImage {
        match self {
            Self::Chebyshev(radius) => ops::dilate(mask, Norm::LInf, *radius),
            Self::Mask(shape) => ops::grayscale_dilate(mask, shape),
        }
    }

    fn open(&self, mask: &GrayImage) -> GrayImage {
        match self {
            Self::Chebyshev(radius) => ops::open(mask, Norm::LInf, *radius),
            Self::Mask(shape) => ops::grayscale_open(mask, shape),
        }
    }

    fn close(&self, mask: &GrayImage) -> GrayImage {
        match self {
            Self::Chebyshev(radius) => ops::close(mask, Norm::LInf, *radius),
            Self::Mask(shape) => ops::grayscale_close(mask, shape),
        }
    }
}

fn guard(mask: &GrayImage, element: StructuringElement) -> Result<Kernel, PipelineError> {
    let kernel = element.kernel(mask.dimensions())?;
    if mask::is_blank(mask) {
        return Err(PipelineError::EmptyMask);
    }
    Ok(kernel)
}

/// Erode `mask`: a pixel stays set only if the whole element fits.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyMask`] if `mask` has no set pixels and
/// [`PipelineError::InvalidConfig`] if `element` fails
/// [`StructuringElement::validate`].
pub fn erode(mask: &GrayImage, element: StructuringElement) -> Result<GrayImage, PipelineError> {
    let kernel = guard(mask, element)?;
    debug!(%element, "erode");
    Ok(kernel.erode(mask))
}

/// Dilate `mask`: a pixel becomes set if the element touches any set
/// pixel.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyMask`] if `mask` has no set pixels and
/// [`PipelineError::InvalidConfig`] if `element` fails
/// [`StructuringElement::validate`].
pub fn dilate(mask: &GrayImage, element: StructuringElement) -> Result<GrayImage, PipelineError> {
    let kernel = guard(mask, element)?;
    debug!(%element, "dilate");
    Ok(kernel.dilate(mask))
}

/// Morphological opening, `dilate(erode(mask))`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyMask`] if `mask` has no set pixels and
/// [`PipelineError::InvalidConfig`] if `element` fails
/// [`StructuringElement::validate`].
pub fn open(mask: &GrayImage, element: StructuringElement) -> Result<GrayImage, PipelineError> {
    let kernel = guard(mask, element)?;
    debug!(%element, "open");
    Ok(kernel.open(mask))
}

/// Morphological closing, `erode(dilate(mask))`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyMask`] if `mask` has no set pixels and
/// [`PipelineError::InvalidConfig`] if `element` fails
/// [`StructuringElement::validate`].
pub fn close(mask: &GrayImage, element: StructuringElement) -> Result<GrayImage, PipelineError> {
    let kernel = guard(mask, element)?;
    debug!(%element, "close");
    Ok(kernel.close(mask))
}
