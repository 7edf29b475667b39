//! breadcheck: classify a bread-slice image as fresh or moldy.
//!
//! Runs the full pipeline on an image file: contrast stretching, HSV
//! segmentation, optional morphology, and fusion with detections read
//! from a JSON file produced by an external model.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin breadcheck -- [OPTIONS] --detections <JSON> <IMAGE_PATH>
//! ```
//!
//! Set `RUST_LOG=debug` for per-stage logging.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ab_glyph::FontArc;
use breadcheck_pipeline::fuse::bundled_font;
use breadcheck_pipeline::types::RgbImage;
use breadcheck_pipeline::{
    AnnotationStyle, ClassificationReport, Detection, Detector, DetectorError, Fuser, Hsv,
    HsvRange, MorphOp, PipelineConfig, PipelineError, PipelineState, StructuringElement,
};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

/// Bread-slice quality classification.
///
/// Segments mold-colored regions and fuses them with object detections
/// to decide whether the slice is fresh or moldy.
#[derive(Parser)]
#[command(name = "breadcheck", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// JSON file with the detector output for this image.
    ///
    /// An array of `{ "name": ..., "bbox": [xmin, ymin, xmax, ymax], "score": ... }`
    /// records. `label` is accepted in place of `name`.
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Morphology to apply to the HSV mask before classification.
    #[arg(long, value_enum)]
    morph: Option<Morph>,

    /// Lower HSV bound as `h,s,v` (hue 0-179).
    #[arg(long, value_parser = parse_hsv, default_value_t = HsvRange::DEFAULT_LOWER)]
    hsv_lower: Hsv,

    /// Upper HSV bound as `h,s,v` (hue 0-179).
    #[arg(long, value_parser = parse_hsv, default_value_t = HsvRange::DEFAULT_UPPER)]
    hsv_upper: Hsv,

    /// Structuring element width in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_KERNEL_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    kernel_width: u32,

    /// Structuring element height in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_KERNEL_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    kernel_height: u32,

    /// Minimum detection score (0.0-1.0).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence: f32,

    /// Outline thickness for drawn boxes.
    #[arg(long, default_value_t = AnnotationStyle::DEFAULT_BOX_THICKNESS)]
    box_thickness: u32,

    /// TrueType/OpenType font for box labels (default: embedded DejaVu
    /// Sans).
    #[arg(long, conflicts_with = "no_labels")]
    font: Option<PathBuf>,

    /// Draw boxes only, without label text.
    #[arg(long)]
    no_labels: bool,

    /// Write the annotated image to file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the final mask (morphed if requested) to file.
    #[arg(long)]
    mask_output: Option<PathBuf>,

    /// Output the report as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Morphology selection.
#[derive(Clone, Copy, ValueEnum)]
enum Morph {
    /// Shrink foreground regions.
    Erode,
    /// Grow foreground regions.
    Dilate,
    /// Erode then dilate: removes speckles.
    Open,
    /// Dilate then erode: fills pinholes.
    Close,
}

impl From<Morph> for MorphOp {
    fn from(m: Morph) -> Self {
        match m {
            Morph::Erode => Self::Erode,
            Morph::Dilate => Self::Dilate,
            Morph::Open => Self::Open,
            Morph::Close => Self::Close,
        }
    }
}

/// Parse `h,s,v` (optionally parenthesized, as [`Hsv`] displays) into an
/// [`Hsv`].
fn parse_hsv(input: &str) -> Result<Hsv, String> {
    let inner = input.trim().trim_start_matches('(').trim_end_matches(')');
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    let &[h, s, v] = parts.as_slice() else {
        return Err(format!("expected h,s,v but got {input:?}"));
    };
    let channel = |name: &str, raw: &str| {
        raw.parse::<u8>()
            .map_err(|e| format!("invalid {name} value {raw:?}: {e}"))
    };
    let h = channel("hue", h)?;
    if h > breadcheck_pipeline::types::MAX_HUE {
        return Err(format!(
            "hue {h} is out of range 0-{}",
            breadcheck_pipeline::types::MAX_HUE
        ));
    }
    Ok(Hsv::new(h, channel("saturation", s)?, channel("value", v)?))
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            hsv_range: HsvRange::new(cli.hsv_lower, cli.hsv_upper),
            structuring_element: StructuringElement::rect(cli.kernel_width, cli.kernel_height),
            confidence_threshold: cli.confidence,
            annotation: AnnotationStyle {
                box_thickness: cli.box_thickness,
                ..AnnotationStyle::default()
            },
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Detector backed by a JSON file of precomputed detections.
///
/// The file is read on every call so a missing or malformed file
/// surfaces as a detector failure.
struct FileDetector {
    path: PathBuf,
}

impl Detector for FileDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            DetectorError::Failed(format!("reading {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            DetectorError::Failed(format!("parsing {}: {e}", self.path.display()))
        })
    }
}

fn load_font(path: &Path) -> Result<FontArc, String> {
    let data = std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    FontArc::try_from_vec(data).map_err(|e| format!("Error loading font {}: {e}", path.display()))
}

/// Build the [`Fuser`], picking the label font from `--font`,
/// `--no-labels`, or the embedded default.
fn fuser_from_cli(cli: &Cli, config: &PipelineConfig) -> Result<Fuser, String> {
    let fuser = Fuser::from_config(config);
    if cli.no_labels {
        return Ok(fuser);
    }
    let font = match cli.font {
        Some(ref path) => load_font(path)?,
        None => bundled_font().map_err(|e| format!("Error loading embedded font: {e}"))?,
    };
    Ok(fuser.with_font(font))
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let fuser = match fuser_from_cli(&cli, &config) {
        Ok(f) => f,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(ExitCode::FAILURE);
        }
    };

    eprintln!("Image: {}", cli.image_path.display());
    eprintln!("Config: {config:#?}");

    let image = image::open(&cli.image_path)?;
    let mut state = PipelineState::default()
        .load(&image)?
        .enhance()?
        .segment(&config.hsv_range)?;

    if let Some(morph) = cli.morph {
        match state.morph(morph.into(), config.structuring_element) {
            Ok(next) => state = next,
            Err(PipelineError::EmptyMask) => {
                warn!("nothing segmented, skipping morphology");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(ref mask_path) = cli.mask_output {
        let mask = state
            .morphed()
            .map(|m| &m.mask)
            .or_else(|| state.mask())
            .ok_or("no mask to write")?;
        mask.save(mask_path)?;
        info!(path = %mask_path.display(), "mask written");
    }

    let detector = cli.detections.map(|path| FileDetector { path });
    let state = match state.classify(detector.as_ref().map(|d| d as &dyn Detector), &fuser) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Classification failed: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if let Some(ref output) = cli.output
        && let Some(classification) = state.classification()
    {
        classification.annotated.save(output)?;
        eprintln!("Annotated image written to {}", output.display());
    }

    let report = ClassificationReport::from_state(&state).ok_or("classification missing")?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }

    Ok(ExitCode::SUCCESS)
}
