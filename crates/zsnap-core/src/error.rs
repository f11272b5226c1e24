//! 吸附取整错误定义

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapError {
    #[error("Pixel size must be positive, got {0}")]
    InvalidPixelSize(String),

    #[error("Number of kd-trees must be at least 1")]
    InvalidTreeCount,

    #[error("Indeterminate comparison: {0}")]
    Indeterminate(String),

    #[error("Coordinate does not fit the pixel grid: {0}")]
    CoordinateOverflow(String),

    #[error("Iterated snap rounding did not converge within {rounds} rounds")]
    IsrNotConverged { rounds: usize },
}

pub type SnapResult<T> = Result<T, SnapError>;
