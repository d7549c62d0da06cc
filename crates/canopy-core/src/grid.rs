use serde::{Deserialize, Serialize};

use crate::error::CanopyError;
use crate::CanopyResult;

/// A 2D grid of vegetation-index values, row-major.
/// `NaN` marks an invalid / no-data pixel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
}

impl Grid {
    /// Create a new Grid filled with the given value.
    pub fn filled(width: usize, height: usize, fill: f64) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
        }
    }

    /// Wrap existing row-major values. `data.len()` must equal `width × height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f64>) -> CanopyResult<Self> {
        if data.len() != width * height {
            return Err(CanopyError::ShapeMismatch {
                expected: format!("{width}x{height} ({} values)", width * height),
                found: format!("{} values", data.len()),
            });
        }
        Ok(Self { data, width, height })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.width + col] = val;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn same_shape(&self, other: &Grid) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Fails with `ShapeMismatch` unless `other` has the same dimensions.
    pub fn ensure_same_shape(&self, other: &Grid) -> CanopyResult<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(CanopyError::ShapeMismatch {
                expected: format!("{}x{}", self.width, self.height),
                found: format!("{}x{}", other.width, other.height),
            })
        }
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Iterator over the non-NaN values.
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied().filter(|v| !v.is_nan())
    }

    /// Mean over non-NaN values; `None` when every pixel is NaN.
    pub fn mean_valid(&self) -> Option<f64> {
        let (sum, n) = self
            .valid_values()
            .fold((0.0f64, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            None
        } else {
            Some(sum / n as f64)
        }
    }
}

/// Area-of-interest mask, already rasterised onto the grid by the caller.
/// `true` = pixel lies inside the polygon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelMask {
    pub data: Vec<bool>,
    pub width: usize,
    pub height: usize,
}

impl PixelMask {
    /// A mask that keeps every pixel.
    pub fn all(width: usize, height: usize) -> Self {
        Self {
            data: vec![true; width * height],
            width,
            height,
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<bool>) -> CanopyResult<Self> {
        if data.len() != width * height {
            return Err(CanopyError::ShapeMismatch {
                expected: format!("{width}x{height} ({} cells)", width * height),
                found: format!("{} cells", data.len()),
            });
        }
        Ok(Self { data, width, height })
    }

    pub fn fits(&self, grid: &Grid) -> bool {
        self.width == grid.width && self.height == grid.height
    }

    pub fn inside_count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }
}
