//! Shared types for the breadcheck image processing pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detection::DetectorError;
use crate::fuse::AnnotationStyle;
use crate::morphology::StructuringElement;

/// Re-export `GrayImage` so downstream crates can reference binary
/// masks without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference color stage
/// outputs without depending on `image` directly.
pub use image::RgbImage;

/// Largest hue value in the 8-bit HSV convention (half-degrees).
pub const MAX_HUE: u8 = 179;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of any `image` buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Returns `true` if either side is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One color in the 8-bit HSV model.
///
/// Hue is stored in half-degrees (`0..=179`) so it fits a byte;
/// saturation and value span the full `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hsv {
    /// Hue in half-degrees, `0..=179`.
    pub h: u8,
    /// Saturation, `0..=255`.
    pub s: u8,
    /// Value (brightness), `0..=255`.
    pub v: u8,
}

impl Hsv {
    /// Create an HSV triple, clamping hue to [`MAX_HUE`].
    #[must_use]
    pub fn new(h: u8, s: u8, v: u8) -> Self {
        Self {
            h: h.min(MAX_HUE),
            s,
            v,
        }
    }
}

impl fmt::Display for Hsv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.h, self.s, self.v)
    }
}

/// Inclusive HSV bounds used by the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    /// Inclusive lower bound per channel.
    pub lower: Hsv,
    /// Inclusive upper bound per channel.
    pub upper: Hsv,
}

impl HsvRange {
    /// Default lower bound: the green/yellow-green band typical of
    /// mold colonies on white bread.
    pub const DEFAULT_LOWER: Hsv = Hsv {
        h: 40,
        s: 50,
        v: 30,
    };

    /// Default upper bound.
    pub const DEFAULT_UPPER: Hsv = Hsv {
        h: 100,
        s: 255,
        v: 200,
    };

    /// Create a range with each component clamped to its channel.
    #[must_use]
    pub fn new(lower: Hsv, upper: Hsv) -> Self {
        Self {
            lower: Hsv::new(lower.h, lower.s, lower.v),
            upper: Hsv::new(upper.h, upper.s, upper.v),
        }
    }

    /// Check that no lower bound exceeds its upper bound.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRange`] naming the first offending
    /// channel.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let channels = [
            ("hue", self.lower.h, self.upper.h),
            ("saturation", self.lower.s, self.upper.s),
            ("value", self.lower.v, self.upper.v),
        ];
        for (channel, lower, upper) in channels {
            if lower > upper {
                return Err(PipelineError::InvalidRange {
                    channel,
                    lower,
                    upper,
                });
            }
        }
        Ok(())
    }

    /// Returns `true` if every component of `hsv` lies inside the range.
    #[must_use]
    pub fn contains(&self, hsv: Hsv) -> bool {
        (self.lower.h..=self.upper.h).contains(&hsv.h)
            && (self.lower.s..=self.upper.s).contains(&hsv.s)
            && (self.lower.v..=self.upper.v).contains(&hsv.v)
    }
}

impl Default for HsvRange {
    fn default() -> Self {
        Self {
            lower: Self::DEFAULT_LOWER,
            upper: Self::DEFAULT_UPPER,
        }
    }
}

/// Final quality decision for a bread slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityVerdict {
    /// No accepted mold detection. Also the verdict when nothing was
    /// detected at all.
    #[default]
    Fresh,
    /// At least one accepted detection carried a mold label.
    Moldy,
}

impl fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fresh => "FRESH",
            Self::Moldy => "MOLDY",
        })
    }
}

/// Primary pipeline stage, in protocol order.
///
/// Morphology is a side branch off [`Stage::Segmented`] and has no
/// variant of its own here; see
/// [`PipelineState::is_morph_ready`](crate::pipeline::PipelineState::is_morph_ready).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing loaded.
    Empty,
    /// Original image present.
    Loaded,
    /// Contrast-stretched image present.
    Enhanced,
    /// HSV mask present.
    Segmented,
    /// Annotated image and verdict present.
    Classified,
}

impl Stage {
    /// Human-readable stage name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Loaded => "original image",
            Self::Enhanced => "enhanced image",
            Self::Segmented => "HSV mask",
            Self::Classified => "classification",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Configuration for the processing pipeline.
///
/// Every field has a default matching the tuned values for white
/// sandwich bread. Missing fields in serialized configs fall back to
/// those defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// HSV bounds for segmentation.
    pub hsv_range: HsvRange,

    /// Kernel shared by every morphology operation.
    pub structuring_element: StructuringElement,

    /// Detections scoring below this are ignored by the fuser.
    pub confidence_threshold: f32,

    /// How boxes and labels are drawn on the annotated image.
    pub annotation: AnnotationStyle,
}

impl PipelineConfig {
    /// Default minimum detection score.
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

    /// Default structuring element side length.
    pub const DEFAULT_KERNEL_SIZE: u32 = 5;

    /// Check the configuration for values no stage can work with.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRange`] for inverted HSV bounds and
    /// [`PipelineError::InvalidConfig`] for a structuring element that
    /// fails [`StructuringElement::validate`], a threshold outside
    /// `0.0..=1.0`, or a non-positive label scale.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.hsv_range.validate()?;
        self.structuring_element.validate()?;
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "confidence threshold must be within 0.0..=1.0, got {}",
                self.confidence_threshold,
            )));
        }
        if self.annotation.label_scale.is_nan() || self.annotation.label_scale <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "label scale must be positive, got {}",
                self.annotation.label_scale,
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hsv_range: HsvRange::default(),
            structuring_element: StructuringElement::default(),
            confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
            annotation: AnnotationStyle::default(),
        }
    }
}

/// Errors that can occur during pipeline processing.
///
/// A failed transition never touches the state it was invoked on, so
/// every earlier stage output stays usable after any of these.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The image has zero width or height.
    #[error("input image is empty (zero area)")]
    InvalidInput,

    /// A lower HSV bound exceeds its upper bound.
    #[error("invalid HSV range: {channel} lower bound {lower} exceeds upper bound {upper}")]
    InvalidRange {
        /// Offending channel name.
        channel: &'static str,
        /// Lower bound supplied.
        lower: u8,
        /// Upper bound supplied.
        upper: u8,
    },

    /// Morphology was requested on a mask with no set pixels.
    #[error("mask has no set pixels; adjust the HSV range before applying morphology")]
    EmptyMask,

    /// The detector is missing or failed.
    #[error("object detection unavailable: {0}")]
    DetectionUnavailable(#[from] DetectorError),

    /// A transition was invoked before its input stage was produced.
    #[error("{required} is required before this step")]
    MissingStage {
        /// The stage whose output was needed.
        required: Stage,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}
