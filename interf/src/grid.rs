//! Physical coordinate grids for the camera plane and its Fourier conjugate.
//!
//! Both grids put the origin at index `n / 2` along each axis, which is where
//! [`crate::spectral::fftshift`] moves the zero-frequency bin. Camera-plane
//! coordinates are in millimetres, Fourier-plane coordinates in cycles/mm.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Camera pixel pitch in micrometres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub x_um: f64,
    pub y_um: f64,
}

impl PixelSize {
    pub fn new(x_um: f64, y_um: f64) -> Self {
        Self { x_um, y_um }
    }

    /// Square pixels
    pub fn square(um: f64) -> Self {
        Self { x_um: um, y_um: um }
    }

    /// Pitch in millimetres as `(x, y)`
    pub fn to_mm(&self) -> (f64, f64) {
        (self.x_um * 1e-3, self.y_um * 1e-3)
    }

    fn validate(&self) -> Result<()> {
        for (axis, v) in [("x", self.x_um), ("y", self.y_um)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::InvalidGrid(format!(
                    "pixel pitch along {axis} must be positive, got {v}"
                )));
            }
        }
        Ok(())
    }
}

/// Axis-aligned extent `(xmin, xmax, ymin, ymax)` of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.xmin, self.xmax, self.ymin, self.ymax)
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Whether a disk of radius `r` centred at `(cx, cy)` lies inside the extent.
    pub fn contains_disk(&self, cx: f64, cy: f64, r: f64) -> bool {
        cx - r >= self.xmin && cx + r <= self.xmax && cy - r >= self.ymin && cy + r <= self.ymax
    }
}

/// Pair of 2-D coordinate arrays with their extent.
///
/// `xx[[i, j]]` is the x coordinate of column `j`, `yy[[i, j]]` the y
/// coordinate of row `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub xx: Array2<f64>,
    pub yy: Array2<f64>,
    pub extent: Extent,
    /// Sample spacing `(dx, dy)` in the grid's units
    pub spacing: (f64, f64),
}

impl Grid {
    fn from_axes(x: Array1<f64>, y: Array1<f64>, spacing: (f64, f64)) -> Self {
        let (rows, cols) = (y.len(), x.len());
        let xx = Array2::from_shape_fn((rows, cols), |(_, j)| x[j]);
        let yy = Array2::from_shape_fn((rows, cols), |(i, _)| y[i]);
        let extent = Extent {
            xmin: x[0],
            xmax: x[cols - 1],
            ymin: y[0],
            ymax: y[rows - 1],
        };
        Self {
            xx,
            yy,
            extent,
            spacing,
        }
    }

    /// Array shape `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.xx.dim()
    }

    /// Index of the origin `(row, col)`
    pub fn origin(&self) -> (usize, usize) {
        let (rows, cols) = self.shape();
        (rows / 2, cols / 2)
    }

    pub fn x_axis(&self) -> Array1<f64> {
        self.xx.row(0).to_owned()
    }

    pub fn y_axis(&self) -> Array1<f64> {
        self.yy.column(0).to_owned()
    }

    /// Nearest `(row, col)` to a physical coordinate, if it lies on the grid.
    pub fn index_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (rows, cols) = self.shape();
        let (r0, c0) = self.origin();
        let col = (x / self.spacing.0).round() + c0 as f64;
        let row = (y / self.spacing.1).round() + r0 as f64;
        if row < 0.0 || col < 0.0 || row >= rows as f64 || col >= cols as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }
}

fn validate_shape(shape: (usize, usize)) -> Result<()> {
    if shape.0 == 0 || shape.1 == 0 {
        return Err(Error::InvalidGrid(format!(
            "image shape must be non-empty, got {shape:?}"
        )));
    }
    Ok(())
}

fn centered_axis(n: usize, step: f64) -> Array1<f64> {
    let c = (n / 2) as f64;
    Array1::from_shape_fn(n, |k| (k as f64 - c) * step)
}

/// Camera-plane grid in millimetres, centred on the image centre.
pub fn camera_grid(shape: (usize, usize), pixel: PixelSize) -> Result<Grid> {
    validate_shape(shape)?;
    pixel.validate()?;
    let (dx, dy) = pixel.to_mm();
    let (rows, cols) = shape;
    Ok(Grid::from_axes(
        centered_axis(cols, dx),
        centered_axis(rows, dy),
        (dx, dy),
    ))
}

/// Fourier-plane grid in cycles/mm, spacing `1 / (n * pitch)` per axis.
pub fn fourier_grid(shape: (usize, usize), pixel: PixelSize) -> Result<Grid> {
    validate_shape(shape)?;
    pixel.validate()?;
    let (px, py) = pixel.to_mm();
    let (rows, cols) = shape;
    let dfx = 1.0 / (cols as f64 * px);
    let dfy = 1.0 / (rows as f64 * py);
    Ok(Grid::from_axes(
        centered_axis(cols, dfx),
        centered_axis(rows, dfy),
        (dfx, dfy),
    ))
}
