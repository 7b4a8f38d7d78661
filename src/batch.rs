use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba};
use nalgebra::Point2;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::engine::{Rectification, Rectifier, RectifyOptions};
use crate::error::RectifyError;
use crate::manifest::{output_file_name, ImageJob, Job, Manifest};
use crate::overlay::draw_metric_grid;

pub const DEFAULT_PREFIX: &str = "rectified_";

/// Metric grid drawn onto each rectified image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOptions {
    pub pitch_mm: f64,
    pub color: Rgba<u8>,
}

impl GridOptions {
    pub fn new(pitch_mm: f64) -> Self {
        Self {
            pitch_mm,
            color: Rgba([0, 255, 0, 255]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Prepended to the input file name to form the output name.
    pub prefix: String,
    pub rectify: RectifyOptions,
    pub grid: Option<GridOptions>,
    /// Process images on the rayon thread pool.
    pub parallel: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input_images"),
            output_dir: PathBuf::from("output_images"),
            prefix: DEFAULT_PREFIX.to_string(),
            rectify: RectifyOptions::default(),
            grid: None,
            parallel: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Rectified {
        output: PathBuf,
        px_per_mm: f64,
        width: u32,
        height: u32,
    },
    Skipped {
        reason: String,
    },
    Failed {
        kind: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub images: Vec<ImageReport>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Rectified { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.images.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create report: {:?}", path))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)
            .with_context(|| format!("Failed to write report: {:?}", path))
    }
}

/// Output path for `name` under the prefix convention.
pub fn output_path(output_dir: &Path, prefix: &str, name: &str) -> PathBuf {
    output_dir.join(format!("{}{}", prefix, output_file_name(name)))
}

/// Rectify every image of `manifest`. Per-image failures are recorded in the
/// report; only an unusable output directory aborts the run.
pub fn run_batch(manifest: &Manifest, options: &BatchOptions) -> Result<BatchReport> {
    std::fs::create_dir_all(&options.output_dir).with_context(|| {
        format!("Failed to create output directory: {:?}", options.output_dir)
    })?;

    let rectifier = Rectifier::new(options.rectify);
    let jobs = manifest.jobs();
    let run = |job: &Job| ImageReport {
        name: job.name().to_string(),
        outcome: run_job(job, &rectifier, options),
    };

    let images: Vec<ImageReport> = if options.parallel {
        jobs.par_iter().map(run).collect()
    } else {
        jobs.iter().map(run).collect()
    };

    let report = BatchReport { images };
    info!(
        processed = report.processed(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Batch complete"
    );
    Ok(report)
}

fn run_job(job: &Job, rectifier: &Rectifier, options: &BatchOptions) -> Outcome {
    match job {
        Job::Skipped { name, reason } => {
            warn!(image = %name, %reason, "Skipping image");
            Outcome::Skipped {
                reason: reason.clone(),
            }
        }
        Job::Invalid { name, error } => {
            error!(image = %name, %error, "Invalid manifest entry");
            Outcome::Failed {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }
        }
        Job::Ready(job) => rectify_job(job, rectifier, options),
    }
}

fn rectify_job(job: &ImageJob, rectifier: &Rectifier, options: &BatchOptions) -> Outcome {
    let input = options.input_dir.join(&job.name);
    let output = output_path(&options.output_dir, &options.prefix, &job.name);

    match rectify_file(
        &input,
        &output,
        &job.corners,
        job.reference.width_mm,
        job.reference.height_mm,
        rectifier,
        options.grid,
    ) {
        Ok(rectified) => {
            info!(
                image = %job.name,
                output = %output.display(),
                scale = %rectified.scale,
                "Processed image"
            );
            Outcome::Rectified {
                output,
                px_per_mm: rectified.scale.px_per_mm(),
                width: rectified.output_size.width,
                height: rectified.output_size.height,
            }
        }
        Err(err) => {
            let kind = failure_kind(&err);
            error!(image = %job.name, kind, "Failed to process image: {:#}", err);
            Outcome::Failed {
                kind: kind.to_string(),
                message: format!("{:#}", err),
            }
        }
    }
}

/// Error kind for reports: the core's own kind, or `io` for anything that
/// went wrong reading, decoding or writing files.
pub fn failure_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<RectifyError>()
        .map(RectifyError::kind)
        .unwrap_or("io")
}

/// Load `input`, rectify it and write the result to `output`.
pub fn rectify_file(
    input: &Path,
    output: &Path,
    corners: &[Point2<f64>],
    width_mm: f64,
    height_mm: f64,
    rectifier: &Rectifier,
    grid: Option<GridOptions>,
) -> Result<Rectification> {
    let img = ImageReader::open(input)
        .with_context(|| format!("Failed to open input file: {:?}", input))?
        .decode()
        .with_context(|| format!("Failed to decode image: {:?}", input))?;

    let mut rectified = rectifier.rectify(&img.to_rgba8(), corners, width_mm, height_mm)?;

    if let Some(grid) = grid {
        draw_metric_grid(&mut rectified.image, rectified.scale, grid.pitch_mm, grid.color);
    }

    save_image(&rectified.image, output)?;
    Ok(rectified)
}

/// Save as RGBA, or as RGB for formats without alpha (transparent
/// background becomes black).
fn save_image(image: &image::RgbaImage, path: &Path) -> Result<()> {
    let format = ImageFormat::from_path(path)
        .with_context(|| format!("Unsupported output format: {:?}", path))?;

    let result = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .save_with_format(path, format)
    } else {
        image.save_with_format(path, format)
    };
    result.with_context(|| format!("Failed to save output: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_prefixes_file_name() {
        let out = output_path(Path::new("out"), "rectified_", "IMG_7282.jpg");
        assert_eq!(out, Path::new("out").join("rectified_IMG_7282.jpg"));

        let nested = output_path(Path::new("out"), "r_", "day1/IMG_1.png");
        assert_eq!(nested, Path::new("out").join("r_IMG_1.png"));
    }

    #[test]
    fn test_failure_kind_distinguishes_core_errors() {
        let core: anyhow::Error = RectifyError::InconsistentScale {
            scale_x: 1.0,
            scale_y: 2.0,
        }
        .into();
        assert_eq!(failure_kind(&core), "inconsistent_scale");

        let wrapped = core.context("while processing");
        assert_eq!(failure_kind(&wrapped), "inconsistent_scale");

        let io = anyhow::anyhow!("Failed to open input file");
        assert_eq!(failure_kind(&io), "io");
    }

    #[test]
    fn test_report_serializes_status_tag() {
        let report = BatchReport {
            images: vec![
                ImageReport {
                    name: "a.jpg".into(),
                    outcome: Outcome::Skipped {
                        reason: "no corners provided".into(),
                    },
                },
                ImageReport {
                    name: "b.jpg".into(),
                    outcome: Outcome::Failed {
                        kind: "degenerate_geometry".into(),
                        message: "corners 0, 1 and 2 are collinear".into(),
                    },
                },
            ],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["images"][0]["status"], "skipped");
        assert_eq!(json["images"][0]["name"], "a.jpg");
        assert_eq!(json["images"][1]["kind"], "degenerate_geometry");
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.processed(), 0);
    }
}
