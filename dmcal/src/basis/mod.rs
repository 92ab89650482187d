//! Phase bases the calibration fits in.
//!
//! A basis turns one masked phase map into a fixed-length coefficient vector.
//! Piston is never part of the result since the interferometer cannot see it.

mod pixel;
mod zernike;

use nalgebra::DVector;
use ndarray::{ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use interf::{Aperture, Grid};

use crate::error::{CalibrationError, Result};

pub use pixel::PixelBasis;
pub use zernike::{noll_to_nm, ZernikeBasis};

/// Projection of phase maps onto a finite set of modes.
pub trait PhaseBasis: Send + Sync {
    fn name(&self) -> &str;

    /// Length of the coefficient vector.
    fn dim(&self) -> usize;

    /// Coefficients of `phase`, which must be sampled on the grid the basis
    /// was built for.
    fn project(&self, phase: &ArrayView2<f64>) -> Result<DVector<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasisConfig {
    /// Noll-ordered Zernike modes up to radial order `n_radial`
    Zernike { n_radial: usize },
    /// Raw phase samples on every `stride`-th pixel of the pupil
    Pixel { stride: usize },
}

impl Default for BasisConfig {
    fn default() -> Self {
        BasisConfig::Zernike { n_radial: 6 }
    }
}

impl BasisConfig {
    pub fn build(&self, grid: &Grid, aperture: &Aperture) -> Result<Box<dyn PhaseBasis>> {
        let basis: Box<dyn PhaseBasis> = match *self {
            BasisConfig::Zernike { n_radial } => {
                Box::new(ZernikeBasis::new(grid, aperture, n_radial)?)
            }
            BasisConfig::Pixel { stride } => Box::new(PixelBasis::new(grid, aperture, stride)?),
        };
        Ok(basis)
    }
}

/// Pupil pixel positions `(row, col)` in row-major order.
fn pupil_pixels(grid: &Grid, aperture: &Aperture) -> Vec<(usize, usize)> {
    let mask = aperture.mask(grid);
    let mut pixels = Vec::new();
    Zip::indexed(&mask).for_each(|(r, c), &inside| {
        if inside {
            pixels.push((r, c));
        }
    });
    pixels
}

/// Phase values at `pixels`, rejecting shape mismatches and non-finite samples.
fn sample(
    phase: &ArrayView2<f64>,
    shape: (usize, usize),
    pixels: &[(usize, usize)],
) -> Result<DVector<f64>> {
    if phase.dim() != shape {
        return Err(interf::Error::ShapeMismatch {
            expected: shape,
            got: phase.dim(),
        }
        .into());
    }
    let values = DVector::from_iterator(pixels.len(), pixels.iter().map(|&(r, c)| phase[[r, c]]));
    if let Some(bad) = values.iter().position(|v| !v.is_finite()) {
        let (r, c) = pixels[bad];
        return Err(CalibrationError::InsufficientData(format!(
            "non-finite phase inside the pupil at ({r}, {c})"
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use interf::grid::camera_grid;
    use interf::PixelSize;

    #[test]
    fn test_config_serde_and_default() {
        let json = serde_json::to_string(&BasisConfig::default()).unwrap();
        assert_eq!(json, r#"{"zernike":{"n_radial":6}}"#);
        let back: BasisConfig = serde_json::from_str(r#"{"pixel":{"stride":2}}"#).unwrap();
        assert_eq!(back, BasisConfig::Pixel { stride: 2 });
    }

    #[test]
    fn test_build_dimensions() {
        let grid = camera_grid((64, 64), PixelSize::square(50.0)).unwrap();
        let aperture = Aperture::new(0.0, 0.0, 1.2);
        let zernike = BasisConfig::default().build(&grid, &aperture).unwrap();
        assert_eq!(zernike.dim(), 27);
        assert_eq!(zernike.name(), "zernike");

        let pixel = BasisConfig::Pixel { stride: 1 }
            .build(&grid, &aperture)
            .unwrap();
        assert_eq!(pixel.dim(), pupil_pixels(&grid, &aperture).len());
    }

    #[test]
    fn test_sample_rejects_nan_inside() {
        let grid = camera_grid((16, 16), PixelSize::square(100.0)).unwrap();
        let aperture = Aperture::new(0.0, 0.0, 0.5);
        let pixels = pupil_pixels(&grid, &aperture);
        let mut phase = ndarray::Array2::zeros((16, 16));
        phase[[8, 8]] = f64::NAN;
        let err = sample(&phase.view(), (16, 16), &pixels).unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientData(_)));

        let wrong = ndarray::Array2::zeros((8, 8));
        assert!(sample(&wrong.view(), (16, 16), &pixels).is_err());
    }
}
