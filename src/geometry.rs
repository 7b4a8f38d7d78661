use nalgebra::{Matrix3, Point2, Vector3};

use crate::error::{Degeneracy, RectifyError, Result};

/// Corner order of every quadrilateral in this crate.
pub const TOP_LEFT: usize = 0;
pub const TOP_RIGHT: usize = 1;
pub const BOTTOM_RIGHT: usize = 2;
pub const BOTTOM_LEFT: usize = 3;

/// Upper bound on rectified canvas area (256 megapixels).
pub const MAX_CANVAS_PIXELS: u64 = 1 << 28;

/// Relative distance below which two corners count as the same point.
const COINCIDENT_TOLERANCE: f64 = 1e-9;

/// Relative triangle area below which three corners count as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-6;

/// Four corners in top-left, top-right, bottom-right, bottom-left order.
pub type Quad = [Point2<f64>; 4];

/// Known physical size of the reference rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceRect {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl ReferenceRect {
    pub fn new(width_mm: f64, height_mm: f64) -> Result<Self> {
        for (name, value) in [("width", width_mm), ("height", height_mm)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(RectifyError::InvalidInput(format!(
                    "reference {} must be a positive number of millimeters, got {}",
                    name, value
                )));
            }
        }
        Ok(Self { width_mm, height_mm })
    }

    /// Physical width:height ratio.
    pub fn aspect_ratio(&self) -> f64 {
        self.width_mm / self.height_mm
    }

    pub fn is_landscape(&self) -> bool {
        self.width_mm >= self.height_mm
    }
}

/// Pixel dimensions of the rectified canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Choose the canvas for rectifying `quad` onto `reference`.
    ///
    /// The longer physical axis keeps the pixel length of the longer of the
    /// two quad edges running along it (top/bottom for width, left/right for
    /// height). The other axis follows from the physical aspect ratio.
    pub fn for_reference(quad: &Quad, reference: &ReferenceRect) -> Result<Self> {
        let [top, right, bottom, left] = edge_lengths(quad);

        let (width, height) = if reference.is_landscape() {
            let width = top.max(bottom).round().max(1.0);
            let height = (width * reference.height_mm / reference.width_mm)
                .round()
                .max(1.0);
            (width, height)
        } else {
            let height = left.max(right).round().max(1.0);
            let width = (height * reference.width_mm / reference.height_mm)
                .round()
                .max(1.0);
            (width, height)
        };

        if !width.is_finite() || !height.is_finite() || width * height > MAX_CANVAS_PIXELS as f64
        {
            return Err(RectifyError::InvalidInput(format!(
                "rectified canvas {}x{} exceeds {} pixels",
                width, height, MAX_CANVAS_PIXELS
            )));
        }

        Ok(Self::new(width as u32, height as u32))
    }

    /// Canvas corners in the same winding as the source quad.
    pub fn destination_corners(&self) -> Quad {
        let (w, h) = (self.width as f64, self.height as f64);
        [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ]
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Convert a corner slice into a quad, checking count and finiteness.
pub fn quad_from_slice(corners: &[Point2<f64>]) -> Result<Quad> {
    let quad: Quad = corners.try_into().map_err(|_| {
        RectifyError::InvalidInput(format!("expected 4 corners, got {}", corners.len()))
    })?;
    if let Some(i) = quad.iter().position(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(RectifyError::InvalidInput(format!(
            "corner {} is not finite: ({}, {})",
            i, quad[i].x, quad[i].y
        )));
    }
    Ok(quad)
}

/// Side lengths in order top, right, bottom, left.
pub fn edge_lengths(quad: &Quad) -> [f64; 4] {
    [
        nalgebra::distance(&quad[TOP_LEFT], &quad[TOP_RIGHT]),
        nalgebra::distance(&quad[TOP_RIGHT], &quad[BOTTOM_RIGHT]),
        nalgebra::distance(&quad[BOTTOM_LEFT], &quad[BOTTOM_RIGHT]),
        nalgebra::distance(&quad[TOP_LEFT], &quad[BOTTOM_LEFT]),
    ]
}

/// Reject quads with coincident corners or any three collinear corners.
///
/// Tolerances are relative to the quad's bounding-box extent so the check
/// does not depend on image resolution.
pub fn check_non_degenerate(quad: &Quad) -> Result<()> {
    let extent = bounding_extent(quad);
    if extent <= f64::EPSILON {
        return Err(RectifyError::DegenerateGeometry(
            Degeneracy::CoincidentPoints { first: 0, second: 1 },
        ));
    }

    for first in 0..4 {
        for second in (first + 1)..4 {
            if nalgebra::distance(&quad[first], &quad[second]) <= COINCIDENT_TOLERANCE * extent {
                return Err(RectifyError::DegenerateGeometry(
                    Degeneracy::CoincidentPoints { first, second },
                ));
            }
        }
    }

    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    for indices in TRIPLES {
        let [a, b, c] = indices.map(|i| quad[i]);
        let cross = (b - a).perp(&(c - a));
        if cross.abs() <= COLLINEAR_TOLERANCE * extent * extent {
            return Err(RectifyError::DegenerateGeometry(
                Degeneracy::CollinearPoints { indices },
            ));
        }
    }

    Ok(())
}

/// Larger side of the axis-aligned bounding box.
fn bounding_extent(quad: &Quad) -> f64 {
    let min_x = quad.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = quad.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = quad.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = quad.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    (max_x - min_x).max(max_y - min_y)
}

/// Transform a point using a projective matrix.
///
/// Returns NaN coordinates when the point maps to the line at infinity.
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = matrix * Vector3::new(x, y, 1.0);
    if p.z.abs() < 1e-15 {
        return (f64::NAN, f64::NAN);
    }
    (p.x / p.z, p.y / p.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad(points: [(f64, f64); 4]) -> Quad {
        points.map(|(x, y)| Point2::new(x, y))
    }

    #[test]
    fn test_reference_rejects_non_positive() {
        assert!(ReferenceRect::new(0.0, 10.0).is_err());
        assert!(ReferenceRect::new(10.0, -1.0).is_err());
        assert!(ReferenceRect::new(f64::NAN, 10.0).is_err());
        assert!(ReferenceRect::new(210.0, 297.0).is_ok());
    }

    #[test]
    fn test_output_size_landscape_keeps_longer_horizontal_edge() {
        // Top edge 400 px, bottom edge 380 px
        let q = quad([(100.0, 100.0), (500.0, 100.0), (490.0, 300.0), (110.0, 300.0)]);
        let reference = ReferenceRect::new(100.0, 50.0).unwrap();
        let size = OutputSize::for_reference(&q, &reference).unwrap();
        assert_eq!(size, OutputSize::new(400, 200));
        assert_relative_eq!(size.aspect_ratio(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_output_size_portrait_keeps_longer_vertical_edge() {
        let q = quad([(0.0, 0.0), (210.0, 0.0), (210.0, 300.0), (0.0, 297.0)]);
        let reference = ReferenceRect::new(210.0, 297.0).unwrap();
        let size = OutputSize::for_reference(&q, &reference).unwrap();
        assert_eq!(size.height, 300);
        assert_eq!(size.width, (300.0_f64 * 210.0 / 297.0).round() as u32);
    }

    #[test]
    fn test_output_size_rejects_huge_canvas() {
        let q = quad([(0.0, 0.0), (1e9, 0.0), (1e9, 1e9), (0.0, 1e9)]);
        let reference = ReferenceRect::new(10.0, 10.0).unwrap();
        assert!(matches!(
            OutputSize::for_reference(&q, &reference),
            Err(RectifyError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_destination_corners_winding() {
        let corners = OutputSize::new(8, 6).destination_corners();
        assert_eq!(corners[TOP_LEFT], Point2::new(0.0, 0.0));
        assert_eq!(corners[TOP_RIGHT], Point2::new(8.0, 0.0));
        assert_eq!(corners[BOTTOM_RIGHT], Point2::new(8.0, 6.0));
        assert_eq!(corners[BOTTOM_LEFT], Point2::new(0.0, 6.0));
    }

    #[test]
    fn test_quad_from_slice_checks_count_and_finiteness() {
        let three = [Point2::new(0.0, 0.0); 3];
        assert!(matches!(quad_from_slice(&three), Err(RectifyError::InvalidInput(_))));

        let mut four = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(quad_from_slice(&four).is_ok());
        four[2].y = f64::INFINITY;
        assert!(matches!(quad_from_slice(&four), Err(RectifyError::InvalidInput(_))));
    }

    #[test]
    fn test_collinear_corners_are_degenerate() {
        let q = quad([(0.0, 0.0), (5.0, 0.0), (10.0, 0.0), (3.0, 7.0)]);
        assert_eq!(
            check_non_degenerate(&q),
            Err(RectifyError::DegenerateGeometry(Degeneracy::CollinearPoints {
                indices: [0, 1, 2]
            }))
        );
    }

    #[test]
    fn test_duplicate_corners_are_degenerate() {
        let q = quad([(0.0, 0.0), (10.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        assert_eq!(
            check_non_degenerate(&q),
            Err(RectifyError::DegenerateGeometry(Degeneracy::CoincidentPoints {
                first: 1,
                second: 2
            }))
        );

        let all_same = quad([(3.0, 3.0); 4]);
        assert!(check_non_degenerate(&all_same).is_err());
    }

    #[test]
    fn test_skewed_quad_is_valid() {
        let q = quad([(100.0, 100.0), (500.0, 120.0), (480.0, 400.0), (80.0, 380.0)]);
        assert!(check_non_degenerate(&q).is_ok());
    }

    #[test]
    fn test_transform_point_identity() {
        let (x, y) = transform_point(&Matrix3::identity(), 12.5, -3.0);
        assert_relative_eq!(x, 12.5);
        assert_relative_eq!(y, -3.0);
    }
}
