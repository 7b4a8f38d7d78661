use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::Point2;
use serde::Deserialize;

use crate::error::RectifyError;
use crate::geometry::{quad_from_slice, ReferenceRect};

/// Physical size of a reference rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeMm {
    pub width: f64,
    pub height: f64,
}

impl SizeMm {
    /// ISO 216 A4, portrait.
    pub const A4: SizeMm = SizeMm {
        width: 210.0,
        height: 297.0,
    };
}

impl Default for SizeMm {
    fn default() -> Self {
        Self::A4
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageEntry {
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: Vec<[f64; 2]>,
    #[serde(default)]
    pub width_mm: Option<f64>,
    #[serde(default)]
    pub height_mm: Option<f64>,
}

/// Batch input: image file name → four corners and the reference size.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub default_size_mm: SizeMm,
    /// `null` marks an image whose corners have not been picked yet.
    pub images: BTreeMap<String, Option<ImageEntry>>,
}

/// A manifest entry ready for the rectifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub name: String,
    pub corners: Vec<Point2<f64>>,
    pub reference: ReferenceRect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Ready(ImageJob),
    Skipped { name: String, reason: String },
    Invalid { name: String, error: RectifyError },
}

impl Job {
    pub fn name(&self) -> &str {
        match self {
            Job::Ready(job) => &job.name,
            Job::Skipped { name, .. } | Job::Invalid { name, .. } => name,
        }
    }
}

impl Manifest {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Malformed manifest")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {:?}", path))?;
        Self::from_json(&text).with_context(|| format!("Failed to parse manifest: {:?}", path))
    }

    /// One job per image, in file-name order. Entries that cannot be
    /// rectified become `Invalid` jobs instead of failing the whole batch.
    ///
    /// Outputs are named after the file name alone, so entries in different
    /// subdirectories sharing a file name are all rejected.
    pub fn jobs(&self) -> Vec<Job> {
        let mut claims: HashMap<&str, usize> = HashMap::new();
        for (name, _) in self.images.iter().filter(|(_, entry)| entry.is_some()) {
            *claims.entry(output_file_name(name)).or_default() += 1;
        }

        self.images
            .iter()
            .map(|(name, entry)| match entry {
                None => Job::Skipped {
                    name: name.clone(),
                    reason: "no corners provided".to_string(),
                },
                Some(entry) => match self.validate(name, entry, &claims) {
                    Ok((corners, reference)) => Job::Ready(ImageJob {
                        name: name.clone(),
                        corners,
                        reference,
                    }),
                    Err(error) => Job::Invalid {
                        name: name.clone(),
                        error,
                    },
                },
            })
            .collect()
    }

    fn validate(
        &self,
        name: &str,
        entry: &ImageEntry,
        claims: &HashMap<&str, usize>,
    ) -> std::result::Result<(Vec<Point2<f64>>, ReferenceRect), RectifyError> {
        let file_name = output_file_name(name);
        if claims.get(file_name).copied().unwrap_or(0) > 1 {
            return Err(RectifyError::InvalidInput(format!(
                "file name {:?} is shared with another entry; outputs would overwrite each other",
                file_name
            )));
        }

        let corners: Vec<Point2<f64>> = entry
            .corners
            .iter()
            .map(|&[x, y]| Point2::new(x, y))
            .collect();
        quad_from_slice(&corners)?;

        let size = match (entry.width_mm, entry.height_mm) {
            (Some(width), Some(height)) => SizeMm { width, height },
            (None, None) => self.default_size_mm,
            _ => {
                return Err(RectifyError::InvalidInput(
                    "width_mm and height_mm must be given together".to_string(),
                ))
            }
        };
        let reference = ReferenceRect::new(size.width, size.height)?;

        Ok((corners, reference))
    }
}

/// The part of a manifest name that ends up in the output file name.
pub fn output_file_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}
