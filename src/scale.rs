use serde::Serialize;

use crate::error::{RectifyError, Result};
use crate::geometry::{OutputSize, ReferenceRect};

/// Default allowance for canvas rounding on the derived axis.
pub const DEFAULT_SCALE_TOLERANCE_PX: f64 = 1.0;

/// Pixels per millimeter of a rectified image.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    pub fn px_per_mm(&self) -> f64 {
        self.0
    }

    pub fn px_to_mm(&self, pixels: f64) -> f64 {
        pixels / self.0
    }

    pub fn mm_to_px(&self, millimeters: f64) -> f64 {
        millimeters * self.0
    }
}

impl std::fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4} px/mm", self.0)
    }
}

/// Pixels per millimeter of a canvas sized for `reference`.
///
/// The horizontal and vertical ratios must agree: the pixel length of the
/// shorter physical axis, predicted from the longer axis's ratio, has to
/// match the canvas within `tolerance_px`. The ratio of the longer axis is
/// returned since that side is never rounded by canvas sizing.
pub fn compute_scale(
    output_size: OutputSize,
    reference: &ReferenceRect,
    tolerance_px: f64,
) -> Result<ScaleFactor> {
    if output_size.width == 0 || output_size.height == 0 {
        return Err(RectifyError::InvalidInput(format!(
            "cannot compute scale of an empty canvas ({}x{})",
            output_size.width, output_size.height
        )));
    }

    let scale_x = output_size.width as f64 / reference.width_mm;
    let scale_y = output_size.height as f64 / reference.height_mm;

    let (scale, predicted, actual) = if reference.is_landscape() {
        (scale_x, scale_x * reference.height_mm, output_size.height as f64)
    } else {
        (scale_y, scale_y * reference.width_mm, output_size.width as f64)
    };

    if !scale.is_finite() || scale <= 0.0 || (predicted - actual).abs() > tolerance_px {
        return Err(RectifyError::InconsistentScale { scale_x, scale_y });
    }

    Ok(ScaleFactor(scale))
}
