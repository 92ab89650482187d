use log::debug;
use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView2;

use interf::{Aperture, Grid};

use super::{pupil_pixels, sample, PhaseBasis};
use crate::error::{CalibrationError, Result};

/// Radial order and azimuthal frequency `(n, m)` of Noll index `j >= 1`.
///
/// Negative `m` selects the sine term.
pub fn noll_to_nm(j: usize) -> (usize, i64) {
    let mut n = 0;
    let mut j1 = j.saturating_sub(1);
    while j1 > n {
        n += 1;
        j1 -= n;
    }
    let sign = if j % 2 == 0 { 1 } else { -1 };
    let m = sign * ((n % 2) + 2 * ((j1 + (n + 1) % 2) / 2)) as i64;
    (n, m)
}

fn factorial(k: usize) -> f64 {
    (1..=k).map(|v| v as f64).product()
}

fn radial(n: usize, m: usize, rho: f64) -> f64 {
    (0..=(n - m) / 2)
        .map(|s| {
            let sign = if s % 2 == 0 { 1.0 } else { -1.0 };
            let num = factorial(n - s);
            let den = factorial(s) * factorial((n + m) / 2 - s) * factorial((n - m) / 2 - s);
            sign * num / den * rho.powi((n - 2 * s) as i32)
        })
        .sum()
}

/// RMS-normalised Zernike polynomial at polar coordinates on the unit disk.
pub(crate) fn zernike(j: usize, rho: f64, theta: f64) -> f64 {
    let (n, m) = noll_to_nm(j);
    let am = m.unsigned_abs() as usize;
    let r = radial(n, am, rho);
    match m {
        0 => ((n + 1) as f64).sqrt() * r,
        m if m > 0 => (2.0 * (n + 1) as f64).sqrt() * r * (m as f64 * theta).cos(),
        _ => (2.0 * (n + 1) as f64).sqrt() * r * (am as f64 * theta).sin(),
    }
}

/// Zernike modes on the pupil, fitted by least squares.
///
/// Piston is fitted alongside the other modes so it cannot leak into them on
/// a pixelated disk, then dropped from the result.
pub struct ZernikeBasis {
    n_radial: usize,
    shape: (usize, usize),
    pixels: Vec<(usize, usize)>,
    /// `(AᵀA)⁻¹Aᵀ` without the piston row
    projector: DMatrix<f64>,
}

impl ZernikeBasis {
    pub fn new(grid: &Grid, aperture: &Aperture, n_radial: usize) -> Result<Self> {
        let modes = (n_radial + 1) * (n_radial + 2) / 2;
        if modes < 2 {
            return Err(CalibrationError::InvalidInput(
                "Zernike basis needs radial order of at least 1".to_string(),
            ));
        }
        let pixels = pupil_pixels(grid, aperture);
        if pixels.len() < modes {
            return Err(CalibrationError::InsufficientData(format!(
                "{} pupil pixels for {modes} Zernike modes",
                pixels.len()
            )));
        }

        let a = DMatrix::from_fn(pixels.len(), modes, |p, col| {
            let (r, c) = pixels[p];
            let x = (grid.xx[[r, c]] - aperture.cx) / aperture.radius;
            let y = (grid.yy[[r, c]] - aperture.cy) / aperture.radius;
            zernike(col + 1, x.hypot(y), y.atan2(x))
        });
        let gram = a.transpose() * &a;
        let chol = gram.cholesky().ok_or_else(|| {
            CalibrationError::NumericInstability(
                "Zernike Gram matrix is not positive definite".to_string(),
            )
        })?;
        let full = chol.solve(&a.transpose());
        let projector = full.rows(1, modes - 1).into_owned();
        debug!(
            "Zernike basis: {} modes over {} pupil pixels",
            modes - 1,
            pixels.len()
        );

        Ok(Self {
            n_radial,
            shape: grid.shape(),
            pixels,
            projector,
        })
    }

    pub fn n_radial(&self) -> usize {
        self.n_radial
    }
}

impl PhaseBasis for ZernikeBasis {
    fn name(&self) -> &str {
        "zernike"
    }

    fn dim(&self) -> usize {
        self.projector.nrows()
    }

    fn project(&self, phase: &ArrayView2<f64>) -> Result<DVector<f64>> {
        let values = sample(phase, self.shape, &self.pixels)?;
        Ok(&self.projector * values)
    }
}
