//! Pipeline orchestration: an immutable state value advanced by pure
//! transitions.
//!
//! [`PipelineState`] records which of the five stage outputs are
//! currently valid. Every transition borrows the state, computes its
//! stage from explicit inputs, and returns a new state:
//!
//! ```rust
//! # use breadcheck_pipeline::{Fuser, HsvRange, MorphOp, PipelineError, PipelineState};
//! # use breadcheck_pipeline::morphology::StructuringElement;
//! # fn run(image: &image::DynamicImage) -> Result<(), PipelineError> {
//! let detections: Vec<breadcheck_pipeline::Detection> = Vec::new();
//! let state = PipelineState::default()
//!     .load(image)?
//!     .enhance()?
//!     .segment(&HsvRange::default())?;
//! let state = state.morph(MorphOp::Open, StructuringElement::default())?;
//! let state = state.classify(Some(&detections), &Fuser::default())?;
//! println!("{:?}", state.verdict());
//! # Ok(())
//! # }
//! ```
//!
//! # Invalidation
//!
//! Re-running a stage discards every output derived from its previous
//! result: enhancing clears the mask, the morphed mask, and the
//! classification; segmenting clears the morphed mask and the
//! classification; morphology clears the classification.
//!
//! # Failure
//!
//! A failed transition returns `Err` and the caller still holds the
//! untouched input state, so every earlier output stays usable.
//!
//! # Memory
//!
//! Stage buffers are reference-counted, so advancing clones pointers
//! rather than pixel data. Superseded buffers are freed once no state
//! refers to them.

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{Detector, DetectorError};
use crate::fuse::{Classification, Fuser};
use crate::morphology::{MorphOp, StructuringElement};
use crate::report::{StageReport, Step};
use crate::types::{
    Dimensions, GrayImage, HsvRange, PipelineError, QualityVerdict, RgbImage, Stage,
};

/// A morphology result together with how it was produced.
#[derive(Debug, Clone)]
pub struct MorphedMask {
    /// Operation applied to the segmented mask.
    pub op: MorphOp,
    /// Kernel used.
    pub element: StructuringElement,
    /// The resulting mask.
    pub mask: GrayImage,
}

/// Which operations are valid to invoke right now.
///
/// A UI can bind control availability directly to these flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// An image can always be loaded.
    pub load: bool,
    /// An original image is present.
    pub enhance: bool,
    /// An enhanced image is present.
    pub segment: bool,
    /// The segmented mask has at least one set pixel.
    pub morph: bool,
    /// A mask is present, a detector is ready, and there is an image to
    /// run it on.
    pub classify: bool,
    /// Anything is loaded.
    pub reset: bool,
}

/// The buffer produced by the most recent stage, for display.
#[derive(Debug, Clone, Copy)]
pub enum StageOutput<'a> {
    /// A color image (original, enhanced, or annotated).
    Color(&'a RgbImage),
    /// A binary mask (segmented or morphed).
    Mask(&'a GrayImage),
}

/// Record of which stage outputs are valid.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    original: Option<Arc<RgbImage>>,
    enhanced: Option<Arc<RgbImage>>,
    mask: Option<Arc<GrayImage>>,
    morphed: Option<Arc<MorphedMask>>,
    classification: Option<Arc<Classification>>,
    history: Vec<StageReport>,
}

/// Most transitions kept in [`PipelineState::history`].
pub const HISTORY_LIMIT: usize = 32;

fn elapsed_secs(started: Instant) -> f64 {
    started.elapsed().as_secs_f64()
}

impl PipelineState {
    // ───────────────────────── Queries ─────────────────────────

    /// Furthest primary stage with a valid output.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        if self.classification.is_some() {
            Stage::Classified
        } else if self.mask.is_some() {
            Stage::Segmented
        } else if self.enhanced.is_some() {
            Stage::Enhanced
        } else if self.original.is_some() {
            Stage::Loaded
        } else {
            Stage::Empty
        }
    }

    /// Whether a morphed mask from the current segmentation exists.
    #[must_use]
    pub const fn is_morph_ready(&self) -> bool {
        self.morphed.is_some()
    }

    /// The loaded image.
    #[must_use]
    pub fn original(&self) -> Option<&RgbImage> {
        self.original.as_deref()
    }

    /// The contrast-stretched image.
    #[must_use]
    pub fn enhanced(&self) -> Option<&RgbImage> {
        self.enhanced.as_deref()
    }

    /// The HSV segmentation mask.
    #[must_use]
    pub fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_deref()
    }

    /// The most recent morphology result.
    #[must_use]
    pub fn morphed(&self) -> Option<&MorphedMask> {
        self.morphed.as_deref()
    }

    /// The annotated image and verdict.
    #[must_use]
    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_deref()
    }

    /// Shortcut for the classification verdict.
    #[must_use]
    pub fn verdict(&self) -> Option<QualityVerdict> {
        self.classification().map(|c| c.verdict)
    }

    /// Status line of the most recent transition.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.history.last().map(|r| r.status.as_str())
    }

    /// Transitions since the image was loaded (or the state reset),
    /// oldest first, capped at the latest [`HISTORY_LIMIT`].
    #[must_use]
    pub fn history(&self) -> &[StageReport] {
        &self.history
    }

    /// Operations valid in this state. `detector_ready` tells whether
    /// the caller has a working detector.
    #[must_use]
    pub fn capabilities(&self, detector_ready: bool) -> Capabilities {
        Capabilities {
            load: true,
            enhance: self.original.is_some(),
            segment: self.enhanced.is_some(),
            morph: self.mask().is_some_and(|m| !crate::mask::is_blank(m)),
            classify: detector_ready && self.mask.is_some() && self.detection_input().is_some(),
            reset: self.stage() != Stage::Empty,
        }
    }

    /// The buffer the most recent transition produced.
    #[must_use]
    pub fn latest_output(&self) -> Option<StageOutput<'_>> {
        let step = self.history.last()?.step;
        match step {
            Step::Load => self.original().map(StageOutput::Color),
            Step::Enhance => self.enhanced().map(StageOutput::Color),
            Step::Segment => self.mask().map(StageOutput::Mask),
            Step::Morph(_) => self.morphed().map(|m| StageOutput::Mask(&m.mask)),
            Step::Classify => self
                .classification()
                .map(|c| StageOutput::Color(&c.annotated)),
            Step::Reset => None,
        }
    }

    /// Image the detector runs on: enhanced when available.
    fn detection_input(&self) -> Option<&RgbImage> {
        self.enhanced().or_else(|| self.original())
    }

    fn record(mut self, step: Step, started: Instant, status: String) -> Self {
        info!(?step, "{status}");
        if self.history.len() >= HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push(StageReport {
            step,
            duration: started.elapsed(),
            status,
        });
        self
    }

    // ───────────────────────── Stage 1: Load ─────────────────────────

    /// Load a decoded image, discarding every previous stage output.
    ///
    /// Grayscale images are replicated to three channels and alpha is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if the image has zero area.
    pub fn load(&self, image: &DynamicImage) -> Result<Self, PipelineError> {
        self.load_rgb(crate::color::to_rgb(image))
    }

    /// Load an RGB image, discarding every previous stage output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if the image has zero area.
    pub fn load_rgb(&self, image: RgbImage) -> Result<Self, PipelineError> {
        let started = Instant::now();
        let dimensions = Dimensions::of(&image);
        crate::color::ensure_non_empty(dimensions)?;
        let next = Self {
            original: Some(Arc::new(image)),
            ..Self::default()
        };
        Ok(next.record(Step::Load, started, format!("Image loaded ({dimensions})")))
    }

    // ───────────────────────── Stage 2: Enhance ──────────────────────

    /// Stretch the original image's luminance.
    ///
    /// Clears the mask, morphed mask, and classification.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingStage`] if nothing is loaded.
    pub fn enhance(&self) -> Result<Self, PipelineError> {
        let started = Instant::now();
        let original = self.original().ok_or(PipelineError::MissingStage {
            required: Stage::Loaded,
        })?;
        let enhanced = crate::color::enhance_luminance(original)?;
        let next = Self {
            original: self.original.clone(),
            enhanced: Some(Arc::new(enhanced)),
            history: self.history.clone(),
            ..Self::default()
        };
        let status = format!(
            "Contrast stretching finished in {:.2} s",
            elapsed_secs(started),
        );
        Ok(next.record(Step::Enhance, started, status))
    }

    // ───────────────────────── Stage 3: Segment ──────────────────────

    /// Threshold the enhanced image in HSV space.
    ///
    /// Clears the morphed mask and classification.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingStage`] if there is no enhanced
    /// image. Returns [`PipelineError::InvalidRange`] for inverted
    /// bounds.
    pub fn segment(&self, range: &HsvRange) -> Result<Self, PipelineError> {
        let started = Instant::now();
        let enhanced = self.enhanced().ok_or(PipelineError::MissingStage {
            required: Stage::Enhanced,
        })?;
        let mask = crate::segment::threshold_hsv(enhanced, range)?;
        let coverage = crate::mask::coverage(&mask);
        if crate::mask::is_blank(&mask) {
            warn!("HSV mask is empty; morphology will be unavailable");
        }
        let next = Self {
            original: self.original.clone(),
            enhanced: self.enhanced.clone(),
            mask: Some(Arc::new(mask)),
            history: self.history.clone(),
            ..Self::default()
        };
        let status = format!(
            "HSV threshold finished in {:.2} s ({:.1}% of pixels set)",
            elapsed_secs(started),
            coverage * 100.0,
        );
        Ok(next.record(Step::Segment, started, status))
    }

    // ───────────────────────── Stage 4: Morphology ───────────────────

    /// Apply `op` to the segmented mask.
    ///
    /// Always reads the segmented mask, never an earlier morphology
    /// result, so operations can be compared side by side. Clears the
    /// classification. The primary stage stays [`Stage::Segmented`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingStage`] if there is no mask,
    /// [`PipelineError::EmptyMask`] if the mask has no set pixels, and
    /// [`PipelineError::InvalidConfig`] for an unusable `element`.
    pub fn morph(&self, op: MorphOp, element: StructuringElement) -> Result<Self, PipelineError> {
        let started = Instant::now();
        let mask = self.mask().ok_or(PipelineError::MissingStage {
            required: Stage::Segmented,
        })?;
        let morphed = op.apply(mask, element)?;
        let next = Self {
            original: self.original.clone(),
            enhanced: self.enhanced.clone(),
            mask: self.mask.clone(),
            morphed: Some(Arc::new(MorphedMask {
                op,
                element,
                mask: morphed,
            })),
            classification: None,
            history: self.history.clone(),
        };
        let status = format!("{op} finished in {:.2} s", elapsed_secs(started));
        Ok(next.record(Step::Morph(op), started, status))
    }

    // ───────────────────────── Stage 5: Classify ─────────────────────

    /// Run `detector` and fuse its detections into a verdict.
    ///
    /// The detector sees the enhanced image (or the original when there
    /// is none). `None` stands for a detector that failed to load.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingStage`] before segmentation.
    /// Returns [`PipelineError::DetectionUnavailable`] if `detector` is
    /// `None` or fails; the mask and images stay usable.
    pub fn classify(
        &self,
        detector: Option<&dyn Detector>,
        fuser: &Fuser,
    ) -> Result<Self, PipelineError> {
        let started = Instant::now();
        if self.mask.is_none() {
            return Err(PipelineError::MissingStage {
                required: Stage::Segmented,
            });
        }
        let image = self.detection_input().ok_or(PipelineError::MissingStage {
            required: Stage::Loaded,
        })?;
        let detector = detector.ok_or(DetectorError::NotLoaded)?;
        let detections = detector.detect(image).inspect_err(|e| {
            warn!(error = %e, "detector failed");
        })?;

        let classification = fuser.fuse(image, &detections);
        let verdict = classification.verdict;
        let next = Self {
            original: self.original.clone(),
            enhanced: self.enhanced.clone(),
            mask: self.mask.clone(),
            morphed: self.morphed.clone(),
            classification: Some(Arc::new(classification)),
            history: self.history.clone(),
        };
        let status = format!(
            "Detection and classification finished in {:.2} s: bread is {verdict}",
            elapsed_secs(started),
        );
        Ok(next.record(Step::Classify, started, status))
    }

    // ───────────────────────── Reset ─────────────────────────────────

    /// Discard every buffer and return to [`Stage::Empty`].
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn reset(&self) -> Self {
        let started = Instant::now();
        Self::default().record(
            Step::Reset,
            started,
            "Pipeline reset; ready for a new image".to_owned(),
        )
    }
}
