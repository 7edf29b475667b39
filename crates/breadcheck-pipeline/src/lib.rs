//! breadcheck-pipeline: bread-slice quality classification (sans-IO).
//!
//! Classifies a bread-slice image as fresh or moldy through:
//! luminance contrast stretching -> HSV segmentation -> optional binary
//! morphology -> detection fusion.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! image buffers and detection lists. Decoding files, running an actual
//! detection model, and presenting results live with the caller (see
//! `breadcheck-cli`).
//!
//! The stages can be driven one at a time through [`PipelineState`], or
//! all at once with [`process`].

pub mod color;
pub mod detection;
pub mod fuse;
pub mod mask;
pub mod morphology;
pub mod pipeline;
pub mod report;
pub mod segment;
pub mod types;

pub use detection::{BoundingBox, Detection, Detector, DetectorError};
pub use fuse::{AnnotationStyle, Classification, Fuser};
pub use morphology::{MorphOp, StructuringElement};
pub use pipeline::{Capabilities, PipelineState};
pub use report::ClassificationReport;
pub use types::{
    Dimensions, Hsv, HsvRange, PipelineConfig, PipelineError, QualityVerdict, Stage,
};

use image::DynamicImage;

/// Run every stage on `image` in protocol order.
///
/// # Pipeline steps
///
/// 1. Load (grayscale replicated to RGB)
/// 2. Luminance contrast stretching
/// 3. HSV thresholding with `config.hsv_range`
/// 4. Optional `morph` against the segmented mask
/// 5. Detection and fusion with `config.confidence_threshold`
///
/// Returns the final state so the caller can inspect every
/// intermediate buffer.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] or
/// [`PipelineError::InvalidRange`] for a bad `config`,
/// [`PipelineError::InvalidInput`] for a zero-area image,
/// [`PipelineError::EmptyMask`] if `morph` is requested but nothing was
/// segmented, and [`PipelineError::DetectionUnavailable`] if the
/// detector is missing or fails.
pub fn process(
    image: &DynamicImage,
    detector: Option<&dyn Detector>,
    config: &PipelineConfig,
    morph: Option<MorphOp>,
) -> Result<PipelineState, PipelineError> {
    config.validate()?;

    let state = PipelineState::default()
        .load(image)?
        .enhance()?
        .segment(&config.hsv_range)?;

    let state = match morph {
        Some(op) => state.morph(op, config.structuring_element)?,
        None => state,
    };

    state.classify(detector, &Fuser::from_config(config))
}
