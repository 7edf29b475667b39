//! Integration test: run synthetic bread slices through every stage, from
//! encoded image bytes to the serialized report.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;

use breadcheck_pipeline::{
    BoundingBox, ClassificationReport, Detection, Detector, DetectorError, Fuser, MorphOp,
    PipelineConfig, PipelineError, PipelineState, QualityVerdict, Stage, StructuringElement,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

const CRUST: Rgb<u8> = Rgb([190, 140, 80]);
const SPOT: Rgb<u8> = Rgb([60, 150, 60]);

/// A 30x30 crust-colored slice with a 12x12 green spot at (8, 8),
/// round-tripped through PNG so the decode path matches real input.
fn spotted_slice() -> DynamicImage {
    let slice = RgbImage::from_fn(30, 30, |x, y| {
        if (8..20).contains(&x) && (8..20).contains(&y) {
            SPOT
        } else {
            CRUST
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(slice)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode PNG");
    image::load_from_memory(&bytes).expect("decode PNG")
}

fn segmented(config: &PipelineConfig) -> PipelineState {
    PipelineState::default()
        .load(&spotted_slice())
        .unwrap()
        .enhance()
        .unwrap()
        .segment(&config.hsv_range)
        .unwrap()
}

struct BrokenModel;

impl Detector for BrokenModel {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        Err(DetectorError::Failed("weights corrupted".to_owned()))
    }
}

#[test]
fn spotted_slice_is_moldy() {
    let config = PipelineConfig::default();
    let detections = vec![Detection::new("mold", BoundingBox::new(6, 6, 22, 22), 0.82)];

    let state = segmented(&config)
        .morph(MorphOp::Open, config.structuring_element)
        .unwrap()
        .classify(Some(&detections), &Fuser::from_config(&config))
        .unwrap();

    assert_eq!(state.stage(), Stage::Classified);
    assert_eq!(state.verdict(), Some(QualityVerdict::Moldy));

    // Opening with a 5x5 element keeps a 12x12 square intact.
    let morphed = state.morphed().unwrap();
    assert_eq!(breadcheck_pipeline::mask::count_set(&morphed.mask), 144);

    let annotated = &state.classification().unwrap().annotated;
    assert_eq!(*annotated.get_pixel(6, 6), Rgb([255, 0, 0]));
    assert_eq!(*annotated.get_pixel(22, 22), Rgb([255, 0, 0]));
    assert_ne!(*annotated.get_pixel(12, 12), Rgb([255, 0, 0]));
}

#[test]
fn spot_is_the_only_segmented_region() {
    let state = segmented(&PipelineConfig::default());
    let mask = state.mask().unwrap();
    for (x, y, pixel) in mask.enumerate_pixels() {
        let inside = (8..20).contains(&x) && (8..20).contains(&y);
        assert_eq!(pixel.0[0] == 255, inside, "pixel ({x}, {y})");
    }
}

#[test]
fn non_mold_detection_stays_fresh() {
    let detections = vec![Detection::new("crumb", BoundingBox::new(2, 2, 10, 10), 0.9)];
    let state = segmented(&PipelineConfig::default())
        .classify(Some(&detections), &Fuser::default())
        .unwrap();

    assert_eq!(state.verdict(), Some(QualityVerdict::Fresh));
    let annotated = &state.classification().unwrap().annotated;
    assert_eq!(*annotated.get_pixel(2, 2), Rgb([0, 255, 0]));
}

#[test]
fn weak_mold_detection_is_ignored() {
    let config = PipelineConfig {
        confidence_threshold: 0.7,
        ..PipelineConfig::default()
    };
    let detections = vec![Detection::new("Mould", BoundingBox::new(6, 6, 22, 22), 0.65)];
    let state = segmented(&config)
        .classify(Some(&detections), &Fuser::from_config(&config))
        .unwrap();

    assert_eq!(state.verdict(), Some(QualityVerdict::Fresh));
    let classification = state.classification().unwrap();
    assert_eq!(classification.below_threshold, 1);
    assert_eq!(&classification.annotated, state.enhanced().unwrap());
}

#[test]
fn mold_outside_the_slice_does_not_count() {
    let detections = vec![Detection::new("mold", BoundingBox::new(40, 40, 60, 60), 0.99)];
    let state = segmented(&PipelineConfig::default())
        .classify(Some(&detections), &Fuser::default())
        .unwrap();

    assert_eq!(state.verdict(), Some(QualityVerdict::Fresh));
    assert_eq!(state.classification().unwrap().degenerate, 1);
}

#[test]
fn failed_detector_keeps_the_mask() {
    let state = segmented(&PipelineConfig::default());
    let err = state.classify(Some(&BrokenModel), &Fuser::default()).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::DetectionUnavailable(DetectorError::Failed(_))
    ));
    assert_eq!(state.stage(), Stage::Segmented);
    assert!(state.mask().is_some());
}

#[test]
fn resegmenting_discards_downstream_outputs() {
    let config = PipelineConfig::default();
    let detections = vec![Detection::new("mold", BoundingBox::new(6, 6, 22, 22), 0.9)];
    let classified = segmented(&config)
        .morph(MorphOp::Dilate, StructuringElement::square(3))
        .unwrap()
        .classify(Some(&detections), &Fuser::default())
        .unwrap();

    let resegmented = classified.segment(&config.hsv_range).unwrap();

    assert_eq!(resegmented.stage(), Stage::Segmented);
    assert!(resegmented.morphed().is_none());
    assert!(resegmented.classification().is_none());
    assert!(!resegmented.is_morph_ready());
    assert!(resegmented.capabilities(true).classify);
}

#[test]
fn report_survives_json() {
    let config = PipelineConfig::default();
    let detections = vec![
        Detection::new("mold", BoundingBox::new(6, 6, 22, 22), 0.82),
        Detection::new("crumb", BoundingBox::new(-5, 20, 12, 40), 0.6),
    ];
    let state = segmented(&config)
        .morph(MorphOp::Close, config.structuring_element)
        .unwrap()
        .classify(Some(&detections), &Fuser::from_config(&config))
        .unwrap();

    let report = ClassificationReport::from_state(&state).unwrap();
    assert_eq!(report.verdict, QualityVerdict::Moldy);
    assert_eq!(report.morphology, Some(MorphOp::Close));
    assert_eq!(report.annotations.len(), 2);
    assert_eq!(report.annotations[1].bbox, BoundingBox::new(0, 20, 12, 29));
    assert!((report.mask_coverage - 144.0 / 900.0).abs() < 1e-9);
    assert_eq!(report.stages.len(), 5);

    let json = serde_json::to_string(&report).unwrap();
    let back: ClassificationReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back.verdict, report.verdict);
    assert_eq!(back.dimensions, report.dimensions);
    assert_eq!(back.annotations, report.annotations);
    let steps = |r: &ClassificationReport| r.stages.iter().map(|s| s.step).collect::<Vec<_>>();
    assert_eq!(steps(&back), steps(&report));
}

#[test]
fn config_from_json_drives_the_pipeline() {
    let config: PipelineConfig = serde_json::from_str(
        r#"{ "confidence_threshold": 0.9, "structuring_element": { "width": 3, "height": 3 } }"#,
    )
    .unwrap();
    config.validate().unwrap();

    let detections = vec![Detection::new("mold", BoundingBox::new(6, 6, 22, 22), 0.85)];
    let state = breadcheck_pipeline::process(
        &spotted_slice(),
        Some(&detections),
        &config,
        Some(MorphOp::Erode),
    )
    .unwrap();

    assert_eq!(state.verdict(), Some(QualityVerdict::Fresh));
    // 3x3 erosion of a 12x12 square leaves 10x10.
    let morphed = state.morphed().unwrap();
    assert_eq!(breadcheck_pipeline::mask::count_set(&morphed.mask), 100);
}
