use image::RgbaImage;
use nalgebra::Point2;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::geometry::{quad_from_slice, OutputSize, Quad, ReferenceRect};
use crate::homography::{self, Homography};
use crate::scale::{compute_scale, ScaleFactor, DEFAULT_SCALE_TOLERANCE_PX};
use crate::transform::{warp, WarpOptions};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectifyOptions {
    pub warp: WarpOptions,
    /// Allowed mismatch, in pixels, between the canvas and the reference
    /// aspect ratio on the derived axis.
    pub scale_tolerance_px: f64,
}

impl Default for RectifyOptions {
    fn default() -> Self {
        Self {
            warp: WarpOptions::default(),
            scale_tolerance_px: DEFAULT_SCALE_TOLERANCE_PX,
        }
    }
}

/// Output of a successful rectification.
#[derive(Debug, Clone)]
pub struct Rectification {
    pub image: RgbaImage,
    pub scale: ScaleFactor,
    /// Source image → rectified canvas.
    pub homography: Homography,
    pub output_size: OutputSize,
}

/// Validated input, nothing computed yet. Rectifying one image consumes
/// each state in turn: [`AwaitingInput`] → [`TransformComputed`] →
/// [`Rectification`].
#[derive(Debug)]
pub struct AwaitingInput<'a> {
    image: &'a RgbaImage,
    corners: Quad,
    reference: ReferenceRect,
}

impl<'a> AwaitingInput<'a> {
    /// `corners` must hold exactly four points in top-left, top-right,
    /// bottom-right, bottom-left order.
    pub fn new(
        image: &'a RgbaImage,
        corners: &[Point2<f64>],
        real_width_mm: f64,
        real_height_mm: f64,
    ) -> Result<Self> {
        let corners = quad_from_slice(corners)?;
        let reference = ReferenceRect::new(real_width_mm, real_height_mm)?;
        Ok(Self {
            image,
            corners,
            reference,
        })
    }

    pub fn compute_transform(self) -> Result<TransformComputed<'a>> {
        let output_size = OutputSize::for_reference(&self.corners, &self.reference)?;
        let homography = homography::estimate(&self.corners, &output_size.destination_corners())?;
        debug!(
            width = output_size.width,
            height = output_size.height,
            "Canvas chosen"
        );
        Ok(TransformComputed {
            image: self.image,
            reference: self.reference,
            homography,
            output_size,
        })
    }
}

/// Homography and canvas fixed, image not yet resampled.
#[derive(Debug)]
pub struct TransformComputed<'a> {
    image: &'a RgbaImage,
    reference: ReferenceRect,
    homography: Homography,
    output_size: OutputSize,
}

impl TransformComputed<'_> {
    pub fn homography(&self) -> &Homography {
        &self.homography
    }

    pub fn output_size(&self) -> OutputSize {
        self.output_size
    }

    pub fn resample(self, options: &RectifyOptions) -> Result<Rectification> {
        // Scale depends only on the canvas, so an inconsistent canvas fails
        // before the full-image warp.
        let scale = compute_scale(self.output_size, &self.reference, options.scale_tolerance_px)?;
        let image = warp(self.image, &self.homography, self.output_size, &options.warp)?;
        Ok(Rectification {
            image,
            scale,
            homography: self.homography,
            output_size: self.output_size,
        })
    }
}

/// Stateless rectification engine; one call per image.
#[derive(Debug, Clone, Default)]
pub struct Rectifier {
    options: RectifyOptions,
}

impl Rectifier {
    pub fn new(options: RectifyOptions) -> Self {
        Self { options }
    }

    /// Map the quad `source_corners` onto a rectangle of
    /// `real_width_mm × real_height_mm`, returning the rectified image and
    /// its pixels-per-millimeter scale.
    #[instrument(
        skip(self, image, source_corners),
        fields(width = image.width(), height = image.height())
    )]
    pub fn rectify(
        &self,
        image: &RgbaImage,
        source_corners: &[Point2<f64>],
        real_width_mm: f64,
        real_height_mm: f64,
    ) -> Result<Rectification> {
        let rectified = AwaitingInput::new(image, source_corners, real_width_mm, real_height_mm)?
            .compute_transform()?
            .resample(&self.options)?;

        info!(
            out_width = rectified.output_size.width,
            out_height = rectified.output_size.height,
            px_per_mm = rectified.scale.px_per_mm(),
            "Image rectified"
        );
        Ok(rectified)
    }
}
