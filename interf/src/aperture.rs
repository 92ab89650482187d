//! Pupil geometry.
//!
//! The pupil centre is anchored on the bump a single poked actuator leaves in
//! the phase map: subtract a rest frame from a centre-poked frame, find the
//! pixels that moved the most, and take their weighted centroid.

use log::{debug, info};
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};

/// Circular pupil in camera-plane millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    pub cx: f64,
    pub cy: f64,
    pub radius: f64,
}

impl Aperture {
    pub fn new(cx: f64, cy: f64, radius: f64) -> Self {
        Self { cx, cy, radius }
    }

    /// `true` where a grid point lies inside the pupil.
    pub fn mask(&self, grid: &Grid) -> Array2<bool> {
        let r2 = self.radius * self.radius;
        Zip::from(&grid.xx).and(&grid.yy).map_collect(|&x, &y| {
            let (dx, dy) = (x - self.cx, y - self.cy);
            dx * dx + dy * dy <= r2
        })
    }

    pub fn fits(&self, extent: &Extent) -> bool {
        self.radius > 0.0 && extent.contains_disk(self.cx, self.cy, self.radius)
    }

    /// `ApertureMismatch` unless the pupil lies inside `extent`.
    pub fn check_fits(&self, extent: &Extent) -> Result<()> {
        if self.fits(extent) {
            return Ok(());
        }
        Err(Error::ApertureMismatch(format!(
            "pupil r={:.3} mm at ({:.3}, {:.3}) does not fit extent {:?}",
            self.radius,
            self.cx,
            self.cy,
            extent.as_tuple()
        )))
    }
}

/// Where the pupil centre comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CentreSource {
    /// Centroid of the bump left by a poked actuator
    PokeBump,
    /// Configured centre in mm
    Fixed { cx: f64, cy: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApertureConfig {
    /// Pixels with magnitude at least this fraction of the maximum carry signal
    pub signal_fraction: f64,
    /// Signal pixels whose deviation is at least this fraction of the largest
    /// deviation form the bump
    pub bump_fraction: f64,
    pub centre: CentreSource,
}

impl Default for ApertureConfig {
    fn default() -> Self {
        Self {
            signal_fraction: 0.3,
            bump_fraction: 0.5,
            centre: CentreSource::PokeBump,
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Estimate the pupil from a rest frame and a centre-poked frame.
///
/// # Arguments
/// * `magnitude` - fringe magnitude of the rest frame, used to select signal
/// * `rest` - unwrapped phase with the mirror at rest
/// * `poked` - unwrapped phase with the central actuator(s) poked
/// * `grid` - camera-plane grid of the phase maps
/// * `radius_um` - pupil radius in micrometres
///
/// # Errors
/// `InsufficientData` when no bump stands out, `ApertureMismatch` when the
/// pupil does not fit the grid extent.
pub fn estimate_aperture(
    magnitude: &ArrayView2<f64>,
    rest: &ArrayView2<f64>,
    poked: &ArrayView2<f64>,
    grid: &Grid,
    radius_um: f64,
    config: &ApertureConfig,
) -> Result<Aperture> {
    let shape = grid.shape();
    for got in [magnitude.dim(), rest.dim(), poked.dim()] {
        if got != shape {
            return Err(Error::ShapeMismatch {
                expected: shape,
                got,
            });
        }
    }
    if !(radius_um.is_finite() && radius_um > 0.0) {
        return Err(Error::ApertureMismatch(format!(
            "pupil radius must be positive, got {radius_um} um"
        )));
    }
    let radius = radius_um * 1e-3;

    let (cx, cy) = match config.centre {
        CentreSource::Fixed { cx, cy } => (cx, cy),
        CentreSource::PokeBump => bump_centroid(magnitude, rest, poked, grid, config)?,
    };

    let aperture = Aperture::new(cx, cy, radius);
    aperture.check_fits(&grid.extent)?;
    info!("aperture centre ({cx:.4}, {cy:.4}) mm, radius {radius:.4} mm");
    Ok(aperture)
}

fn bump_centroid(
    magnitude: &ArrayView2<f64>,
    rest: &ArrayView2<f64>,
    poked: &ArrayView2<f64>,
    grid: &Grid,
    config: &ApertureConfig,
) -> Result<(f64, f64)> {
    let peak = magnitude
        .iter()
        .copied()
        .filter(|m| m.is_finite())
        .fold(0.0_f64, f64::max);
    if peak <= 0.0 {
        return Err(Error::InsufficientData(
            "rest frame carries no fringe signal".to_string(),
        ));
    }
    let floor = config.signal_fraction * peak;

    // (row, col, delta) over finite signal pixels
    let mut samples: Vec<(usize, usize, f64)> = Vec::new();
    for ((i, j), &m) in magnitude.indexed_iter() {
        let delta = poked[[i, j]] - rest[[i, j]];
        if m >= floor && delta.is_finite() {
            samples.push((i, j, delta));
        }
    }
    if samples.is_empty() {
        return Err(Error::InsufficientData(
            "no signal pixels to locate the poke bump".to_string(),
        ));
    }

    let mut deltas: Vec<f64> = samples.iter().map(|s| s.2).collect();
    let baseline = median(&mut deltas);
    let deviation: Vec<f64> = samples.iter().map(|s| (s.2 - baseline).abs()).collect();
    let max_dev = deviation.iter().copied().fold(0.0_f64, f64::max);
    if !(max_dev > 0.0) {
        return Err(Error::InsufficientData(
            "poked frame does not differ from the rest frame".to_string(),
        ));
    }

    let cut = config.bump_fraction * max_dev;
    let (mut wsum, mut xsum, mut ysum) = (0.0, 0.0, 0.0);
    for (&(i, j, _), &w) in samples.iter().zip(deviation.iter()) {
        if w >= cut {
            wsum += w;
            xsum += w * grid.xx[[i, j]];
            ysum += w * grid.yy[[i, j]];
        }
    }
    debug!(
        "poke bump: {} signal pixels, max deviation {max_dev:.3} rad",
        samples.len()
    );
    Ok((xsum / wsum, ysum / wsum))
}
