use clap::{Args, Parser, Subcommand};
use nalgebra::Point2;
use std::path::PathBuf;

use crate::batch::{self, BatchOptions, GridOptions, DEFAULT_PREFIX};
use crate::engine::RectifyOptions;
use crate::transform::{Interpolation, WarpOptions};

#[derive(Parser, Debug)]
#[command(name = "planar-rectify")]
#[command(
    version,
    about = "Remove perspective distortion from photos of planar objects and report pixels per millimeter"
)]
pub struct Cli {
    /// Show transform details
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rectify a single image
    Single(SingleArgs),

    /// Rectify every image listed in a JSON manifest
    Batch(BatchArgs),
}

/// Corner list as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Corners(pub Vec<Point2<f64>>);

#[derive(Args, Debug, Clone)]
pub struct SamplingArgs {
    /// Interpolation used when resampling
    #[arg(long, value_enum, default_value_t = Interpolation::Bilinear)]
    pub interpolation: Interpolation,

    /// Draw a reference grid every N millimeters on the output
    #[arg(long, value_name = "MM")]
    pub grid_mm: Option<f64>,
}

impl SamplingArgs {
    pub fn rectify_options(&self) -> RectifyOptions {
        RectifyOptions {
            warp: WarpOptions {
                interpolation: self.interpolation,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn grid(&self) -> Option<GridOptions> {
        self.grid_mm.map(GridOptions::new)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SingleArgs {
    /// Input image path
    #[arg(required = true)]
    pub input: PathBuf,

    /// Reference corners "x,y x,y x,y x,y" (top-left, top-right, bottom-right, bottom-left)
    #[arg(short, long, value_parser = parse_corners, allow_hyphen_values = true)]
    pub corners: Corners,

    /// Physical width of the reference rectangle
    #[arg(long)]
    pub width_mm: f64,

    /// Physical height of the reference rectangle
    #[arg(long)]
    pub height_mm: f64,

    /// Output path [default: rectified_<input> next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub sampling: SamplingArgs,
}

impl SingleArgs {
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let name = self.input.file_name().unwrap_or_default().to_string_lossy();
            let parent = self.input.parent().unwrap_or(std::path::Path::new("."));
            batch::output_path(parent, DEFAULT_PREFIX, &name)
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// JSON manifest mapping file names to corners and sizes
    #[arg(required = true)]
    pub manifest: PathBuf,

    /// Directory holding the input images
    #[arg(long, default_value = "input_images")]
    pub input_dir: PathBuf,

    /// Directory receiving rectified images
    #[arg(long, default_value = "output_images")]
    pub output_dir: PathBuf,

    /// Prefix added to output file names
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Write a JSON report of every image's outcome
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Process images in parallel
    #[arg(long)]
    pub parallel: bool,

    #[command(flatten)]
    pub sampling: SamplingArgs,
}

impl BatchArgs {
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            prefix: self.prefix.clone(),
            rectify: self.sampling.rectify_options(),
            grid: self.sampling.grid(),
            parallel: self.parallel,
        }
    }
}

fn parse_corners(s: &str) -> Result<Corners, String> {
    let points = s
        .split(|c: char| c == ';' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(parse_point)
        .collect::<Result<Vec<_>, _>>()?;

    if points.is_empty() {
        return Err("No corners given, expected \"x,y x,y x,y x,y\"".to_string());
    }
    Ok(Corners(points))
}

fn parse_point(s: &str) -> Result<Point2<f64>, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid corner '{}', expected x,y", s));
    }

    let x: f64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| format!("Invalid x value: {}", parts[0]))?;
    let y: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| format!("Invalid y value: {}", parts[1]))?;

    Ok(Point2::new(x, y))
}
