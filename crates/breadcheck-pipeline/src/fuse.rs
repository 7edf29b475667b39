//! Detection fusion: draw accepted detections and derive the verdict.
//!
//! Each detection scoring at or above the confidence threshold is
//! clipped to the image, outlined (red for mold, green for anything
//! else) and labeled `"{label} ({score:.2})"`. The verdict is
//! [`QualityVerdict::Moldy`] as soon as one drawn detection carries a
//! mold label, otherwise [`QualityVerdict::Fresh`].
//!
//! Label text is rasterized only when the [`Fuser`] has a font, either
//! the caller's or the embedded DejaVu Sans from [`bundled_font`]. The
//! label string and its position are always reported in [`Annotation`].

use std::fmt;

use ab_glyph::{FontArc, InvalidFont};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::{BoundingBox, Detection};
use crate::types::{Dimensions, PipelineConfig, QualityVerdict, RgbImage};

/// DejaVu Sans (Bitstream Vera license, see `assets/`).
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// The embedded label font.
///
/// # Errors
///
/// Returns [`InvalidFont`] if the embedded data fails to parse.
pub fn bundled_font() -> Result<FontArc, InvalidFont> {
    FontArc::try_from_slice(BUNDLED_FONT)
}

/// Outline and label color for mold detections.
pub const MOLD_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Outline and label color for every other detection.
pub const OTHER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Labels whose baseline would land within this many pixels of the top
/// edge are moved inside the box.
const TOP_MARGIN: i32 = 10;

/// Gap between the box top and a label drawn above it.
const LABEL_GAP: i32 = 5;

/// Baseline offset below the box top for labels drawn inside it.
const INSIDE_OFFSET: i32 = 15;

/// Drawing parameters for annotations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationStyle {
    /// Outline thickness in pixels, growing inward from the box edge.
    pub box_thickness: u32,
    /// Label glyph height in pixels.
    pub label_scale: f32,
}

impl AnnotationStyle {
    /// Default outline thickness.
    pub const DEFAULT_BOX_THICKNESS: u32 = 2;

    /// Default label height.
    pub const DEFAULT_LABEL_SCALE: f32 = 18.0;
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            box_thickness: Self::DEFAULT_BOX_THICKNESS,
            label_scale: Self::DEFAULT_LABEL_SCALE,
        }
    }
}

/// One detection as it was drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Detector class name.
    pub label: String,
    /// Detector confidence.
    pub score: f32,
    /// Box after clipping to the image.
    pub bbox: BoundingBox,
    /// Whether the label matched a mold synonym.
    pub is_mold: bool,
    /// Rendered label text.
    pub text: String,
    /// Label baseline origin `(x, y)`.
    pub text_origin: (i32, i32),
}

/// Result of fusing detections with an image.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Copy of the input with boxes and labels drawn on it.
    pub annotated: RgbImage,
    /// Overall quality decision.
    pub verdict: QualityVerdict,
    /// Every detection that was drawn, in input order.
    pub annotations: Vec<Annotation>,
    /// Detections dropped for scoring under the threshold.
    pub below_threshold: usize,
    /// Detections dropped because clipping left no area.
    pub degenerate: usize,
}

/// Draws detections and decides the verdict.
#[derive(Clone)]
pub struct Fuser {
    confidence_threshold: f32,
    style: AnnotationStyle,
    font: Option<FontArc>,
}

impl fmt::Debug for Fuser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fuser")
            .field("confidence_threshold", &self.confidence_threshold)
            .field("style", &self.style)
            .field("font", &self.font.is_some())
            .finish()
    }
}

impl Default for Fuser {
    fn default() -> Self {
        Self::new(PipelineConfig::DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl Fuser {
    /// Fuser with the default style and no font.
    #[must_use]
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            style: AnnotationStyle::default(),
            font: None,
        }
    }

    /// Fuser using the threshold and style from `config`.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.confidence_threshold).with_style(config.annotation)
    }

    /// Replace the drawing style.
    #[must_use]
    pub const fn with_style(mut self, style: AnnotationStyle) -> Self {
        self.style = style;
        self
    }

    /// Rasterize labels with `font`.
    #[must_use]
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Whether labels will be rasterized.
    #[must_use]
    pub const fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Minimum accepted score.
    #[must_use]
    pub const fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Draw `detections` on a copy of `image` and classify it.
    ///
    /// No detections at all yields an unmodified copy and
    /// [`QualityVerdict::Fresh`].
    #[must_use = "returns the annotated image and verdict"]
    pub fn fuse(&self, image: &RgbImage, detections: &[Detection]) -> Classification {
        let mut classification = Classification {
            annotated: image.clone(),
            verdict: QualityVerdict::Fresh,
            annotations: Vec::new(),
            below_threshold: 0,
            degenerate: 0,
        };
        if detections.is_empty() {
            debug!("no detections, defaulting to fresh");
            return classification;
        }

        let dimensions = Dimensions::of(image);
        for detection in detections {
            // Written as a negation so NaN scores are skipped too.
            if !(detection.score >= self.confidence_threshold) {
                classification.below_threshold += 1;
                continue;
            }
            let Some(bbox) = detection.bbox.clip(dimensions) else {
                debug!(
                    label = %detection.label,
                    bbox = ?detection.bbox,
                    "skipping detection with no area inside the image",
                );
                classification.degenerate += 1;
                continue;
            };

            let is_mold = detection.is_mold();
            let color = if is_mold { MOLD_COLOR } else { OTHER_COLOR };
            draw_outline(
                &mut classification.annotated,
                bbox,
                color,
                self.style.box_thickness,
            );

            let text = format!("{} ({:.2})", detection.label, detection.score);
            let text_origin = label_origin(bbox);
            if let Some(font) = &self.font {
                #[allow(clippy::cast_possible_truncation)]
                let top = text_origin.1 - self.style.label_scale.round() as i32;
                draw_text_mut(
                    &mut classification.annotated,
                    color,
                    text_origin.0,
                    top,
                    self.style.label_scale,
                    font,
                    &text,
                );
            }

            classification.annotations.push(Annotation {
                label: detection.label.clone(),
                score: detection.score,
                bbox,
                is_mold,
                text,
                text_origin,
            });
        }

        if classification.annotations.iter().any(|a| a.is_mold) {
            classification.verdict = QualityVerdict::Moldy;
        }
        debug!(
            drawn = classification.annotations.len(),
            below_threshold = classification.below_threshold,
            degenerate = classification.degenerate,
            verdict = %classification.verdict,
            "detections fused",
        );
        classification
    }
}

/// Fuse with the default style and no font.
#[must_use = "returns the annotated image and verdict"]
pub fn fuse_and_classify(
    image: &RgbImage,
    detections: &[Detection],
    confidence_threshold: f32,
) -> Classification {
    Fuser::new(confidence_threshold).fuse(image, detections)
}

/// Baseline origin for a box label: just above the box, or just inside
/// its top edge when above would be too close to the image top.
#[must_use]
pub const fn label_origin(bbox: BoundingBox) -> (i32, i32) {
    let above = bbox.ymin - LABEL_GAP;
    let y = if above > TOP_MARGIN {
        above
    } else {
        bbox.ymin + INSIDE_OFFSET
    };
    (bbox.xmin, y)
}

/// Outline `bbox` with `thickness` nested one-pixel rectangles, growing
/// inward so the outline never leaves a clipped box.
fn draw_outline(image: &mut RgbImage, bbox: BoundingBox, color: Rgb<u8>, thickness: u32) {
    for (inset, offset) in (0..thickness).zip(0_i32..) {
        let shrink = inset * 2;
        if shrink >= bbox.width() || shrink >= bbox.height() {
            break;
        }
        let rect = Rect::at(bbox.xmin + offset, bbox.ymin + offset)
            .of_size(bbox.width() - shrink, bbox.height() - shrink);
        draw_hollow_rect_mut(image, rect, color);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

    fn canvas() -> RgbImage {
        RgbImage::from_fn(100, 80, |_, _| GRAY)
    }

    fn mold(score: f32) -> Detection {
        Detection::new("mold", BoundingBox::new(10, 20, 40, 50), score)
    }

    fn crust(score: f32) -> Detection {
        Detection::new("crust", BoundingBox::new(50, 20, 90, 60), score)
    }

    #[test]
    fn no_detections_is_fresh_and_unmodified() {
        let img = canvas();
        let result = fuse_and_classify(&img, &[], 0.5);
        assert_eq!(result.verdict, QualityVerdict::Fresh);
        assert_eq!(result.annotated, img);
        assert!(result.annotations.is_empty());
    }

    #[test]
    fn mold_and_crust_are_both_drawn_and_moldy() {
        let img = canvas();
        let result = fuse_and_classify(&img, &[mold(0.9), crust(0.95)], 0.5);
        assert_eq!(result.verdict, QualityVerdict::Moldy);
        assert_eq!(result.annotations.len(), 2);

        assert_eq!(result.annotated.get_pixel(10, 20), &MOLD_COLOR);
        assert_eq!(result.annotated.get_pixel(11, 30), &MOLD_COLOR);
        assert_eq!(result.annotated.get_pixel(25, 35), &GRAY);
        assert_eq!(result.annotated.get_pixel(90, 60), &OTHER_COLOR);
        assert_eq!(result.annotated.get_pixel(70, 40), &GRAY);

        // The input buffer is untouched.
        assert_eq!(img.get_pixel(10, 20), &GRAY);
    }

    /// Pixels in the given area that differ from the gray canvas.
    fn painted(image: &RgbImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| image.get_pixel(x, y) != &GRAY)
            .count()
    }

    #[test]
    fn font_rasterizes_label_above_box() {
        let img = canvas();
        let plain = fuse_and_classify(&img, &[mold(0.9)], 0.5);
        let labeled = Fuser::new(0.5)
            .with_font(bundled_font().unwrap())
            .fuse(&img, &[mold(0.9)]);

        assert_eq!(labeled.annotations, plain.annotations);
        assert_eq!(labeled.verdict, QualityVerdict::Moldy);
        // The box starts at y = 20; its label baseline sits at y = 15.
        assert_eq!(painted(&plain.annotated, 10..100, 0..16), 0);
        assert!(painted(&labeled.annotated, 10..100, 0..16) > 0);
        // Box pixels are the same either way.
        assert_eq!(labeled.annotated.get_pixel(10, 20), &MOLD_COLOR);
        assert_eq!(labeled.annotated.get_pixel(40, 50), &MOLD_COLOR);
    }

    #[test]
    fn font_rasterizes_label_inside_box_near_top() {
        let img = canvas();
        let near_top = Detection::new("bread_mold", BoundingBox::new(10, 5, 90, 60), 0.8);
        let plain = fuse_and_classify(&img, &[near_top.clone()], 0.5);
        let labeled = Fuser::new(0.5)
            .with_font(bundled_font().unwrap())
            .fuse(&img, &[near_top]);

        assert_eq!(labeled.annotations[0].text_origin, (10, 20));
        // Interior of the box, inside the 2px outline.
        assert_eq!(painted(&plain.annotated, 12..89, 7..21), 0);
        assert!(painted(&labeled.annotated, 12..89, 7..21) > 0);
    }

    #[test]
    fn low_score_mold_is_skipped() {
        let img = canvas();
        let result = fuse_and_classify(&img, &[mold(0.3)], 0.5);
        assert_eq!(result.verdict, QualityVerdict::Fresh);
        assert!(result.annotations.is_empty());
        assert_eq!(result.below_threshold, 1);
        assert_eq!(result.annotated, img);
    }

    #[test]
    fn score_equal_to_threshold_is_accepted() {
        let result = fuse_and_classify(&canvas(), &[mold(0.5)], 0.5);
        assert_eq!(result.verdict, QualityVerdict::Moldy);
    }

    #[test]
    fn nan_score_is_skipped() {
        let result = fuse_and_classify(&canvas(), &[mold(f32::NAN)], 0.5);
        assert_eq!(result.verdict, QualityVerdict::Fresh);
        assert_eq!(result.below_threshold, 1);
    }

    #[test]
    fn oversized_box_is_clipped_and_drawn() {
        let img = canvas();
        let detection = Detection::new("crust", BoundingBox::new(-10, -10, 110, 90), 0.8);
        let result = fuse_and_classify(&img, &[detection], 0.5);
        assert_eq!(result.annotations.len(), 1);
        assert_eq!(result.annotations[0].bbox, BoundingBox::new(0, 0, 99, 79));
        assert_eq!(result.annotated.get_pixel(0, 0), &OTHER_COLOR);
        assert_eq!(result.annotated.get_pixel(99, 79), &OTHER_COLOR);
        assert_eq!(result.annotated.get_pixel(50, 40), &GRAY);
    }

    #[test]
    fn box_outside_image_does_not_affect_verdict() {
        let img = canvas();
        let outside = Detection::new("mold", BoundingBox::new(150, 10, 200, 40), 0.99);
        let result = fuse_and_classify(&img, &[outside], 0.5);
        assert_eq!(result.verdict, QualityVerdict::Fresh);
        assert_eq!(result.degenerate, 1);
        assert_eq!(result.annotated, img);
    }

    #[test]
    fn label_text_has_two_decimals() {
        let result = fuse_and_classify(&canvas(), &[crust(0.956)], 0.5);
        assert_eq!(result.annotations[0].text, "crust (0.96)");
    }

    #[test]
    fn label_sits_above_box_when_room() {
        assert_eq!(label_origin(BoundingBox::new(10, 40, 20, 60)), (10, 35));
    }

    #[test]
    fn label_moves_inside_near_top_edge() {
        assert_eq!(label_origin(BoundingBox::new(10, 15, 20, 60)), (10, 30));
        assert_eq!(label_origin(BoundingBox::new(10, 0, 20, 60)), (10, 15));
    }

    #[test]
    fn verdict_ignores_how_many_molds() {
        let many = vec![mold(0.6), mold(0.99), mold(0.51)];
        let one = vec![mold(0.6)];
        assert_eq!(
            fuse_and_classify(&canvas(), &many, 0.5).verdict,
            fuse_and_classify(&canvas(), &one, 0.5).verdict,
        );
    }

    #[test]
    fn thick_outline_stays_inside_small_box() {
        let style = AnnotationStyle {
            box_thickness: 10,
            ..AnnotationStyle::default()
        };
        let detection = Detection::new("mold", BoundingBox::new(10, 20, 12, 22), 0.9);
        let result = Fuser::new(0.5).with_style(style).fuse(&canvas(), &[detection]);
        assert_eq!(result.annotated.get_pixel(9, 20), &GRAY);
        assert_eq!(result.annotated.get_pixel(11, 21), &MOLD_COLOR);
    }
}
