use image::{Rgba, RgbaImage};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{RectifyError, Result};
use crate::geometry::{transform_point, OutputSize};
use crate::homography::Homography;

/// Mapped coordinates this close to an integer are taken as that integer,
/// absorbing round-off in the estimated transform.
const SNAP_TOLERANCE: f64 = 1e-6;

/// Sampling rule used when a destination pixel maps between source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Lower-quality fallback; selecting it is logged.
    Nearest,
    #[default]
    Bilinear,
    /// Catmull-Rom
    Bicubic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpOptions {
    pub interpolation: Interpolation,
    /// Fill for destination pixels whose source falls outside the image.
    pub background: Rgba<u8>,
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Bilinear,
            background: Rgba([0, 0, 0, 0]),
        }
    }
}

/// Premultiply alpha: RGB values are multiplied by alpha
fn premultiply_alpha(img: &RgbaImage) -> Vec<[f64; 4]> {
    img.pixels()
        .map(|pixel| {
            let alpha = pixel[3] as f64 / 255.0;
            [
                pixel[0] as f64 * alpha,
                pixel[1] as f64 * alpha,
                pixel[2] as f64 * alpha,
                pixel[3] as f64,
            ]
        })
        .collect()
}

/// Unpremultiply alpha: divide RGB by alpha
fn unpremultiply_alpha(premultiplied: [f64; 4]) -> Rgba<u8> {
    let alpha = premultiplied[3];
    if alpha < 0.5 {
        return Rgba([0, 0, 0, 0]);
    }

    let alpha_norm = alpha / 255.0;
    let channel = |v: f64| (v / alpha_norm).round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(premultiplied[0]),
        channel(premultiplied[1]),
        channel(premultiplied[2]),
        alpha.round().clamp(0.0, 255.0) as u8,
    ])
}

/// Cubic interpolation kernel (Catmull-Rom)
fn cubic_weight(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;

    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

/// Premultiplied source with edge-clamped access.
struct Source<'a> {
    data: &'a [[f64; 4]],
    width: u32,
    height: u32,
}

impl Source<'_> {
    fn at(&self, x: i64, y: i64) -> [f64; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width as usize + x]
    }

    fn bilinear(&self, x: f64, y: f64) -> [f64; 4] {
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let x_frac = x - x.floor();
        let y_frac = y - y.floor();

        let p00 = self.at(x0, y0);
        let p10 = self.at(x0 + 1, y0);
        let p01 = self.at(x0, y0 + 1);
        let p11 = self.at(x0 + 1, y0 + 1);

        let mut result = [0.0; 4];
        for c in 0..4 {
            let top = p00[c] * (1.0 - x_frac) + p10[c] * x_frac;
            let bottom = p01[c] * (1.0 - x_frac) + p11[c] * x_frac;
            result[c] = top * (1.0 - y_frac) + bottom * y_frac;
        }
        result
    }

    fn bicubic(&self, x: f64, y: f64) -> [f64; 4] {
        let x_floor = x.floor() as i64;
        let y_floor = y.floor() as i64;
        let wx = cubic_weight(x - x.floor());
        let wy = cubic_weight(y - y.floor());

        let mut result = [0.0; 4];
        for (j, wy_j) in wy.iter().enumerate() {
            for (i, wx_i) in wx.iter().enumerate() {
                let p = self.at(x_floor + i as i64 - 1, y_floor + j as i64 - 1);
                let weight = wx_i * wy_j;
                for c in 0..4 {
                    result[c] += p[c] * weight;
                }
            }
        }
        result
    }
}

fn snap(v: f64) -> f64 {
    let rounded = v.round();
    if (v - rounded).abs() < SNAP_TOLERANCE {
        rounded
    } else {
        v
    }
}

/// Warp `img` onto a canvas of `output_size` through `homography`
/// (source → destination) by inverse mapping.
///
/// Destination pixel `(u, v)` is sampled at `H⁻¹·(u, v)`. When that point is
/// not finite or lies outside `[0, width) × [0, height)` the pixel receives
/// `options.background`.
pub fn warp(
    img: &RgbaImage,
    homography: &Homography,
    output_size: OutputSize,
    options: &WarpOptions,
) -> Result<RgbaImage> {
    let (src_width, src_height) = img.dimensions();
    if src_width == 0 || src_height == 0 {
        return Err(RectifyError::InvalidInput(format!(
            "source image is empty ({}x{})",
            src_width, src_height
        )));
    }
    if output_size.width == 0 || output_size.height == 0 {
        return Err(RectifyError::InvalidInput(format!(
            "output canvas is empty ({}x{})",
            output_size.width, output_size.height
        )));
    }

    let inverse = homography.inverse()?;
    let inverse_matrix = inverse.matrix();

    if options.interpolation == Interpolation::Nearest {
        warn!("Nearest-neighbor sampling selected; output quality is reduced");
    }
    debug!(
        src_width,
        src_height,
        out_width = output_size.width,
        out_height = output_size.height,
        interpolation = ?options.interpolation,
        "Warping image"
    );

    // Nearest copies source pixels verbatim and needs no premultiplied copy.
    let premultiplied = match options.interpolation {
        Interpolation::Nearest => Vec::new(),
        Interpolation::Bilinear | Interpolation::Bicubic => premultiply_alpha(img),
    };
    let source = Source {
        data: &premultiplied,
        width: src_width,
        height: src_height,
    };

    let (max_x, max_y) = (src_width as f64, src_height as f64);
    let mut output = RgbaImage::new(output_size.width, output_size.height);

    for out_y in 0..output_size.height {
        for out_x in 0..output_size.width {
            let (src_x, src_y) = transform_point(inverse_matrix, out_x as f64, out_y as f64);
            let (src_x, src_y) = (snap(src_x), snap(src_y));

            let inside = src_x.is_finite()
                && src_y.is_finite()
                && src_x >= 0.0
                && src_x < max_x
                && src_y >= 0.0
                && src_y < max_y;
            if !inside {
                output.put_pixel(out_x, out_y, options.background);
                continue;
            }

            let pixel = match options.interpolation {
                Interpolation::Nearest => {
                    let x = (src_x.round() as u32).min(src_width - 1);
                    let y = (src_y.round() as u32).min(src_height - 1);
                    *img.get_pixel(x, y)
                }
                Interpolation::Bilinear => unpremultiply_alpha(source.bilinear(src_x, src_y)),
                Interpolation::Bicubic => unpremultiply_alpha(source.bicubic(src_x, src_y)),
            };
            output.put_pixel(out_x, out_y, pixel);
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    use crate::homography::estimate;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 20) as u8, (y * 20) as u8, ((x + y) * 5) as u8, 255])
        })
    }

    fn translation(dx: f64, dy: f64) -> Homography {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        let dst = src.map(|p| Point2::new(p.x + dx, p.y + dy));
        estimate(&src, &dst).unwrap()
    }

    #[test]
    fn test_premultiply_unpremultiply() {
        let pixel = Rgba([200, 100, 50, 128]);
        let img = RgbaImage::from_pixel(1, 1, pixel);
        let premul = premultiply_alpha(&img);

        let unpremul = unpremultiply_alpha(premul[0]);
        assert_eq!(unpremul, pixel);
    }

    #[test]
    fn test_identity_transform() {
        let img = gradient(10, 8);
        for interpolation in [
            Interpolation::Nearest,
            Interpolation::Bilinear,
            Interpolation::Bicubic,
        ] {
            let options = WarpOptions {
                interpolation,
                ..Default::default()
            };
            let result =
                warp(&img, &Homography::identity(), OutputSize::new(10, 8), &options).unwrap();
            assert_eq!(result, img, "{:?}", interpolation);
        }
    }

    #[test]
    fn test_translation_crops_source_region() {
        let img = gradient(10, 10);
        // Source (2, 3) lands on destination origin
        let h = translation(-2.0, -3.0);
        let result = warp(&img, &h, OutputSize::new(4, 5), &WarpOptions::default()).unwrap();

        for y in 0..5 {
            for x in 0..4 {
                assert_eq!(result.get_pixel(x, y), img.get_pixel(x + 2, y + 3));
            }
        }
    }

    #[test]
    fn test_outside_pixels_get_background() {
        let img = gradient(4, 4);
        let h = translation(-2.0, 0.0);
        let options = WarpOptions {
            background: Rgba([1, 2, 3, 4]),
            ..Default::default()
        };
        let result = warp(&img, &h, OutputSize::new(6, 4), &options).unwrap();

        // Columns 0 and 1 map to source x = 2, 3; columns 3.. fall off the right edge
        assert_eq!(result.get_pixel(1, 0), img.get_pixel(3, 0));
        for y in 0..4 {
            for x in 3..6 {
                assert_eq!(*result.get_pixel(x, y), Rgba([1, 2, 3, 4]));
            }
        }
    }

    #[test]
    fn test_negative_source_coordinates_get_background() {
        let img = gradient(4, 4);
        let h = translation(3.0, 3.0);
        let result = warp(&img, &h, OutputSize::new(6, 6), &WarpOptions::default()).unwrap();
        assert_eq!(*result.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*result.get_pixel(2, 2), Rgba([0, 0, 0, 0]));
        assert_eq!(*result.get_pixel(5, 1), Rgba([0, 0, 0, 0]));
        assert_eq!(result.get_pixel(4, 4), img.get_pixel(1, 1));
    }

    #[test]
    fn test_bilinear_midpoint() {
        let img = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([200, 100, 50, 255])
            }
        });
        // Destination x = 1 samples source x = 0.5
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let dst = src.map(|p| Point2::new(p.x * 2.0, p.y));
        let h = estimate(&src, &dst).unwrap();
        let result = warp(&img, &h, OutputSize::new(3, 1), &WarpOptions::default()).unwrap();

        assert_eq!(*result.get_pixel(1, 0), Rgba([100, 50, 25, 255]));
    }

    #[test]
    fn test_transparent_neighbors_do_not_bleed() {
        let img = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([255, 0, 0, 0])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let dst = src.map(|p| Point2::new(p.x * 2.0, p.y));
        let h = estimate(&src, &dst).unwrap();
        let result = warp(&img, &h, OutputSize::new(3, 1), &WarpOptions::default()).unwrap();

        let mid = result.get_pixel(1, 0);
        assert_eq!(mid[0], 0);
        assert_eq!(mid[2], 255);
    }

    #[test]
    fn test_empty_source_is_invalid() {
        let img = RgbaImage::new(0, 0);
        let err = warp(
            &img,
            &Homography::identity(),
            OutputSize::new(2, 2),
            &WarpOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RectifyError::InvalidInput(_)));
    }
}
