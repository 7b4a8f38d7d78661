use thiserror::Error;

/// Why a point configuration cannot define a unique projective transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Degeneracy {
    /// Two corners sit on (numerically) the same location.
    CoincidentPoints { first: usize, second: usize },
    /// Three corners lie on one line.
    CollinearPoints { indices: [usize; 3] },
    /// Gaussian elimination hit a pivot below the singularity threshold.
    SingularSystem { pivot: f64 },
    /// The solved transform does not reproduce its own correspondences.
    IllConditioned { max_error: f64 },
}

impl std::fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoincidentPoints { first, second } => {
                write!(f, "corners {} and {} coincide", first, second)
            }
            Self::CollinearPoints { indices } => write!(
                f,
                "corners {}, {} and {} are collinear",
                indices[0], indices[1], indices[2]
            ),
            Self::SingularSystem { pivot } => {
                write!(f, "linear system is singular (pivot {:.3e})", pivot)
            }
            Self::IllConditioned { max_error } => write!(
                f,
                "transform is ill-conditioned (correspondence error {:.3e})",
                max_error
            ),
        }
    }
}

/// Errors produced by the rectification core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RectifyError {
    /// Malformed corner set or physical size. Caller error.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The picked corners cannot define a transform and must be re-picked.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(Degeneracy),

    /// Output canvas does not match the reference rectangle's aspect ratio.
    #[error("inconsistent scale: {scale_x:.4} px/mm horizontally vs {scale_y:.4} px/mm vertically")]
    InconsistentScale { scale_x: f64, scale_y: f64 },
}

impl RectifyError {
    /// Stable snake_case name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::DegenerateGeometry(_) => "degenerate_geometry",
            Self::InconsistentScale { .. } => "inconsistent_scale",
        }
    }
}

pub type Result<T> = std::result::Result<T, RectifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(RectifyError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(
            RectifyError::DegenerateGeometry(Degeneracy::SingularSystem { pivot: 0.0 }).kind(),
            "degenerate_geometry"
        );
        assert_eq!(
            RectifyError::InconsistentScale { scale_x: 1.0, scale_y: 2.0 }.kind(),
            "inconsistent_scale"
        );
    }

    #[test]
    fn test_display_names_indices() {
        let err = RectifyError::DegenerateGeometry(Degeneracy::CollinearPoints {
            indices: [0, 1, 2],
        });
        assert_eq!(
            err.to_string(),
            "degenerate geometry: corners 0, 1 and 2 are collinear"
        );
    }
}
