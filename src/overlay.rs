use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;
use tracing::warn;

use crate::scale::ScaleFactor;

/// Grid lines closer than this are not drawn.
const MIN_PITCH_PX: f64 = 2.0;

/// Draw a grid with one line every `pitch_mm` millimeters, starting at the
/// top-left corner of a rectified image.
pub fn draw_metric_grid(image: &mut RgbaImage, scale: ScaleFactor, pitch_mm: f64, color: Rgba<u8>) {
    let pitch_px = scale.mm_to_px(pitch_mm);
    if !pitch_px.is_finite() || pitch_px < MIN_PITCH_PX {
        warn!(pitch_mm, pitch_px, "Grid pitch too small to draw, skipping overlay");
        return;
    }

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let (right, bottom) = ((width - 1) as f32, (height - 1) as f32);

    let mut x = 0.0;
    while x < width as f64 {
        draw_line_segment_mut(image, (x as f32, 0.0), (x as f32, bottom), color);
        x += pitch_px;
    }

    let mut y = 0.0;
    while y < height as f64 {
        draw_line_segment_mut(image, (0.0, y as f32), (right, y as f32), color);
        y += pitch_px;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{OutputSize, ReferenceRect};
    use crate::scale::compute_scale;

    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn scale_of(width: u32, height: u32, width_mm: f64, height_mm: f64) -> ScaleFactor {
        let reference = ReferenceRect::new(width_mm, height_mm).unwrap();
        compute_scale(OutputSize::new(width, height), &reference, 1.0).unwrap()
    }

    #[test]
    fn test_grid_lines_follow_millimeter_pitch() {
        let mut img = RgbaImage::new(100, 50);
        // 2 px/mm, grid every 10 mm = every 20 px
        let scale = scale_of(100, 50, 50.0, 25.0);
        draw_metric_grid(&mut img, scale, 10.0, GREEN);

        for x in [0, 20, 40, 60, 80] {
            assert_eq!(*img.get_pixel(x, 25), GREEN, "column {}", x);
        }
        for y in [0, 20, 40] {
            assert_eq!(*img.get_pixel(33, y), GREEN, "row {}", y);
        }
        assert_eq!(*img.get_pixel(10, 10), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_tiny_pitch_is_skipped() {
        let mut img = RgbaImage::new(10, 10);
        let scale = scale_of(10, 10, 100.0, 100.0);
        draw_metric_grid(&mut img, scale, 1.0, GREEN);
        assert!(img.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
    }
}
