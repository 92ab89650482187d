//! Synthetic off-axis interferograms.
//!
//! Renders `I = bias * (1 + V * t(x, y) * cos(2π f·r + φ))` on the camera grid,
//! where `t` is the pupil transmission. Used by the simulated camera backend
//! and throughout the test suites.

use ndarray::{Array2, ArrayView2, Zip};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::aperture::Aperture;
use crate::error::{Error, Result};
use crate::grid::{camera_grid, Grid, PixelSize};

/// Interferometer geometry and fringe parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FringeModel {
    /// Frame shape `(rows, cols)`
    pub shape: (usize, usize),
    pub pixel: PixelSize,
    /// Carrier `(fx, fy)` in cycles/mm
    pub carrier: (f64, f64),
    /// Mean intensity in counts
    pub bias: f64,
    /// Fringe visibility in `[0, 1]`
    pub visibility: f64,
    /// Illuminated pupil; fringes cover the whole frame when `None`
    pub pupil: Option<Aperture>,
    /// Gaussian read noise in counts
    pub noise_sigma: f64,
}

impl Default for FringeModel {
    /// 128x128 frame of 30 um pixels, carrier on bin (24, 10), 1.5 mm pupil
    fn default() -> Self {
        let shape = (128, 128);
        let pixel = PixelSize::square(30.0);
        Self {
            carrier: carrier_for_bins(shape, pixel, 24.0, 10.0),
            shape,
            pixel,
            bias: 2000.0,
            visibility: 0.8,
            pupil: Some(Aperture::new(0.0, 0.0, 1.5)),
            noise_sigma: 0.0,
        }
    }
}

/// Carrier frequency in cycles/mm that falls exactly on Fourier bin `(bx, by)`.
pub fn carrier_for_bins(shape: (usize, usize), pixel: PixelSize, bx: f64, by: f64) -> (f64, f64) {
    let (px, py) = pixel.to_mm();
    (bx / (shape.1 as f64 * px), by / (shape.0 as f64 * py))
}

impl FringeModel {
    pub fn camera_grid(&self) -> Result<Grid> {
        camera_grid(self.shape, self.pixel)
    }

    /// Noise-free interferogram for a phase map sampled on the camera grid.
    pub fn render(&self, phase: &ArrayView2<f64>) -> Result<Array2<f64>> {
        if phase.dim() != self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                got: phase.dim(),
            });
        }
        let grid = self.camera_grid()?;
        let (fx, fy) = self.carrier;
        let r2 = self.pupil.map(|p| (p, p.radius * p.radius));

        let mut image = Array2::zeros(self.shape);
        Zip::from(&mut image)
            .and(&grid.xx)
            .and(&grid.yy)
            .and(phase)
            .for_each(|out, &x, &y, &phi| {
                let t = match r2 {
                    Some((p, r2)) if (x - p.cx).powi(2) + (y - p.cy).powi(2) > r2 => 0.0,
                    _ => 1.0,
                };
                let arg = 2.0 * PI * (fx * x + fy * y) + phi;
                *out = self.bias * (1.0 + self.visibility * t * arg.cos());
            });
        Ok(image)
    }

    /// [`FringeModel::render`] plus read noise, quantised to camera counts.
    pub fn capture<R: Rng>(&self, phase: &ArrayView2<f64>, rng: &mut R) -> Result<Array2<u16>> {
        let mut image = self.render(phase)?;
        add_gaussian_noise(&mut image, self.noise_sigma, rng);
        Ok(to_u16(&image))
    }

    /// Phase map for `f(x, y)` with coordinates in mm.
    pub fn phase_from_fn(&self, f: impl Fn(f64, f64) -> f64) -> Result<Array2<f64>> {
        let grid = self.camera_grid()?;
        Ok(Zip::from(&grid.xx).and(&grid.yy).map_collect(|&x, &y| f(x, y)))
    }
}

/// Add zero-mean Gaussian noise in place. Non-positive or non-finite sigma is a no-op.
pub fn add_gaussian_noise<R: Rng>(image: &mut Array2<f64>, sigma: f64, rng: &mut R) {
    if !(sigma.is_finite() && sigma > 0.0) {
        return;
    }
    if let Ok(normal) = Normal::new(0.0, sigma) {
        image.iter_mut().for_each(|v| *v += normal.sample(rng));
    }
}

/// Round and clamp to the `u16` range.
pub fn to_u16(image: &Array2<f64>) -> Array2<u16> {
    image.mapv(|v| v.round().clamp(0.0, u16::MAX as f64) as u16)
}

/// Uniform frame with no fringes.
pub fn flat_field(shape: (usize, usize), level: f64) -> Array2<f64> {
    Array2::from_elem(shape, level)
}
