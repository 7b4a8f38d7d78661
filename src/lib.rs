pub mod batch;
pub mod cli;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod homography;
pub mod manifest;
pub mod overlay;
pub mod scale;
pub mod transform;

pub use cli::Cli;
pub use engine::{Rectification, Rectifier, RectifyOptions};
pub use error::{Degeneracy, RectifyError};
pub use geometry::{OutputSize, Quad, ReferenceRect};
pub use homography::{estimate, Homography};
pub use manifest::Manifest;
pub use scale::{compute_scale, ScaleFactor};
pub use transform::{warp, Interpolation, WarpOptions};
