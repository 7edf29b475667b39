//! Detector collaborator contract and the detection record it produces.
//!
//! The pipeline never runs a model itself. Anything that can turn an RGB
//! image into labeled boxes implements [`Detector`]; the fuser then
//! consumes the resulting [`Detection`]s read-only.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, RgbImage};

/// Labels (compared case-insensitively) that mark a detection as mold.
pub const MOLD_LABELS: [&str; 4] = ["mold", "mould", "bread_mold", "jamur"];

/// Returns `true` if `label` names mold.
#[must_use]
pub fn is_mold_label(label: &str) -> bool {
    MOLD_LABELS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(label))
}

/// Axis-aligned box in pixel coordinates, corners inclusive.
///
/// Serialized as `[xmin, ymin, xmax, ymax]`. Fractional coordinates
/// from a detector are truncated toward zero when read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    /// Left edge.
    pub xmin: i32,
    /// Top edge.
    pub ymin: i32,
    /// Right edge.
    pub xmax: i32,
    /// Bottom edge.
    pub ymax: i32,
}

impl BoundingBox {
    /// Create a box from its corners.
    #[must_use]
    pub const fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Clip the box to an image of `dimensions`.
    ///
    /// Each corner is clamped into `0..=dimension - 1`. Returns `None`
    /// when the clipped box is degenerate (`xmin >= xmax` or
    /// `ymin >= ymax`), which includes every box lying fully outside the
    /// image.
    #[must_use]
    pub fn clip(self, dimensions: Dimensions) -> Option<Self> {
        if dimensions.is_empty() {
            return None;
        }
        let max_x = i32::try_from(dimensions.width - 1).unwrap_or(i32::MAX);
        let max_y = i32::try_from(dimensions.height - 1).unwrap_or(i32::MAX);
        let clipped = Self {
            xmin: self.xmin.max(0),
            ymin: self.ymin.max(0),
            xmax: self.xmax.min(max_x),
            ymax: self.ymax.min(max_y),
        };
        (clipped.xmin < clipped.xmax && clipped.ymin < clipped.ymax).then_some(clipped)
    }

    /// Width counting both edge columns.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.xmax.abs_diff(self.xmin) + 1
    }

    /// Height counting both edge rows.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.ymax.abs_diff(self.ymin) + 1
    }
}

impl From<[f64; 4]> for BoundingBox {
    #[allow(clippy::cast_possible_truncation)]
    fn from([xmin, ymin, xmax, ymax]: [f64; 4]) -> Self {
        Self::new(xmin as i32, ymin as i32, xmax as i32, ymax as i32)
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.xmin, b.ymin, b.xmax, b.ymax]
    }
}

const fn default_score() -> f32 {
    1.0
}

/// One recognized object.
///
/// Extra attributes a detector may emit (class ids, masks, ...) are
/// dropped when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class name reported by the detector.
    #[serde(alias = "name")]
    pub label: String,
    /// Box in image pixel coordinates; may extend past the image.
    pub bbox: BoundingBox,
    /// Confidence in `0.0..=1.0`. Defaults to 1.0 when absent.
    #[serde(default = "default_score")]
    pub score: f32,
}

impl Detection {
    /// Create a detection.
    #[must_use]
    pub fn new(label: impl Into<String>, bbox: BoundingBox, score: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            score,
        }
    }

    /// Returns `true` if the label names mold.
    #[must_use]
    pub fn is_mold(&self) -> bool {
        is_mold_label(&self.label)
    }
}

/// Errors a detector collaborator can report.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// No model has been loaded.
    #[error("detector model is not loaded")]
    NotLoaded,

    /// The model is loaded but inference failed.
    #[error("detector failed: {0}")]
    Failed(String),
}

/// Trait for object detectors feeding the classification stage.
///
/// Input: an 8-bit RGB image.
/// Output: detections in any order; an empty list means nothing found.
/// The call is synchronous and must finish before fusion runs.
pub trait Detector {
    /// Detect objects in `image`.
    ///
    /// # Errors
    ///
    /// Returns a [`DetectorError`] if the model is unavailable or
    /// inference fails.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// A fixed list of detections, returned for every image.
///
/// Useful as a stand-in for a real model in tests and when detections
/// were computed elsewhere.
impl Detector for [Detection] {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        Ok(self.to_vec())
    }
}

impl Detector for Vec<Detection> {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        self.as_slice().detect(image)
    }
}
