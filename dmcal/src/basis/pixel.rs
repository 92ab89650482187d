use nalgebra::DVector;
use ndarray::ArrayView2;

use interf::{Aperture, Grid};

use super::{pupil_pixels, sample, PhaseBasis};
use crate::error::{CalibrationError, Result};

/// Phase samples on a sub-grid of the pupil, mean removed.
pub struct PixelBasis {
    stride: usize,
    shape: (usize, usize),
    pixels: Vec<(usize, usize)>,
}

impl PixelBasis {
    pub fn new(grid: &Grid, aperture: &Aperture, stride: usize) -> Result<Self> {
        if stride == 0 {
            return Err(CalibrationError::InvalidInput(
                "pixel basis stride must be at least 1".to_string(),
            ));
        }
        let pixels: Vec<_> = pupil_pixels(grid, aperture)
            .into_iter()
            .filter(|(r, c)| r % stride == 0 && c % stride == 0)
            .collect();
        if pixels.len() < 2 {
            return Err(CalibrationError::InsufficientData(format!(
                "{} pupil samples at stride {stride}",
                pixels.len()
            )));
        }
        Ok(Self {
            stride,
            shape: grid.shape(),
            pixels,
        })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl PhaseBasis for PixelBasis {
    fn name(&self) -> &str {
        "pixel"
    }

    fn dim(&self) -> usize {
        self.pixels.len()
    }

    fn project(&self, phase: &ArrayView2<f64>) -> Result<DVector<f64>> {
        let values = sample(phase, self.shape, &self.pixels)?;
        let mean = values.mean();
        Ok(values.add_scalar(-mean))
    }
}
