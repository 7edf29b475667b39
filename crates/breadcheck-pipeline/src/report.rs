//! Stage timing records and the serializable classification report.
//!
//! Durations are written as fractional seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fuse::Annotation;
use crate::morphology::MorphOp;
use crate::pipeline::PipelineState;
use crate::types::{Dimensions, QualityVerdict};

/// Stage durations as JSON numbers of seconds.
mod seconds {
    use std::time::Duration;

    use serde::de::{Deserialize, Deserializer, Error};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(elapsed: &Duration, out: S) -> Result<S::Ok, S::Error> {
        out.serialize_f64(elapsed.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(input: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(input)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid stage duration {secs}: {e}")))
    }
}

/// Which transition produced a [`StageReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// An image was loaded.
    Load,
    /// Luminance contrast stretching.
    Enhance,
    /// HSV thresholding.
    Segment,
    /// One morphology operation.
    Morph(MorphOp),
    /// Detection and classification.
    Classify,
    /// Everything discarded.
    Reset,
}

/// Timing and status for one completed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Transition that ran.
    pub step: Step,
    /// Wall-clock duration (seconds).
    #[serde(with = "seconds")]
    pub duration: Duration,
    /// Short human-readable status line.
    pub status: String,
}

/// Everything a caller needs to present a finished classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Source image size.
    pub dimensions: Dimensions,
    /// Final decision.
    pub verdict: QualityVerdict,
    /// Fraction of pixels set in the HSV mask.
    pub mask_coverage: f64,
    /// Morphology applied last, if any.
    pub morphology: Option<MorphOp>,
    /// Drawn detections.
    pub annotations: Vec<Annotation>,
    /// Detections under the confidence threshold.
    pub below_threshold: usize,
    /// Detections clipped to nothing.
    pub degenerate: usize,
    /// Transitions since the image was loaded, in order.
    pub stages: Vec<StageReport>,
}

impl ClassificationReport {
    /// Build a report from a classified state.
    ///
    /// Returns `None` until the state has a classification.
    #[must_use]
    pub fn from_state(state: &PipelineState) -> Option<Self> {
        let classification = state.classification()?;
        let mask = state.mask()?;
        Some(Self {
            dimensions: Dimensions::of(&classification.annotated),
            verdict: classification.verdict,
            mask_coverage: crate::mask::coverage(mask),
            morphology: state.morphed().map(|m| m.op),
            annotations: classification.annotations.clone(),
            below_threshold: classification.below_threshold,
            degenerate: classification.degenerate,
            stages: state.history().to_vec(),
        })
    }

    /// Total time spent in every recorded transition.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Generate a human-readable multi-line report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Bread Quality Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {} ({} pixels)",
            self.dimensions,
            self.dimensions.area(),
        ));
        lines.push(format!(
            "Mask coverage: {:.2}%",
            self.mask_coverage * 100.0,
        ));
        if let Some(op) = self.morphology {
            lines.push(format!("Morphology: {op}"));
        }
        lines.push(String::new());

        lines.push(format!("{:<16} {:>10}  {}", "Stage", "Duration", "Status"));
        lines.push("-".repeat(80));
        for stage in &self.stages {
            let name = match stage.step {
                Step::Load => "Load",
                Step::Enhance => "Enhance",
                Step::Segment => "Segment",
                Step::Morph(op) => op.label(),
                Step::Classify => "Classify",
                Step::Reset => "Reset",
            };
            let ms = stage.duration.as_secs_f64() * 1000.0;
            lines.push(format!("{name:<16} {ms:>8.3}ms  {}", stage.status));
        }
        lines.push(String::new());

        for annotation in &self.annotations {
            let b = annotation.bbox;
            let kind = if annotation.is_mold { "mold" } else { "other" };
            lines.push(format!(
                "[{kind:>5}] {} at ({}, {})-({}, {})",
                annotation.text, b.xmin, b.ymin, b.xmax, b.ymax,
            ));
        }
        lines.push(format!(
            "Drawn: {}  |  Below threshold: {}  |  Degenerate: {}",
            self.annotations.len(),
            self.below_threshold,
            self.degenerate,
        ));
        lines.push(format!("Verdict: {}", self.verdict));

        lines.join("\n")
    }
}
