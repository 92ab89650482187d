//! First-order peak detection in the centred log-magnitude spectrum.

use log::{debug, warn};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::Grid;

/// Tuning knobs for [`locate_orders`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Radius around zero frequency excluded from the search, as a fraction
    /// of the smaller Nyquist frequency
    pub dc_exclusion: f64,
    /// Minimum `ln(peak / dc)` for a peak to count as a diffraction order
    pub min_log_ratio: f64,
    /// Allowed `|f0 + f1|` in Fourier bins before a warning is logged
    pub asymmetry_tolerance: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            dc_exclusion: 0.1,
            min_log_ratio: 1e-3_f64.ln(),
            asymmetry_tolerance: 1.5,
        }
    }
}

/// Fourier-plane positions of the two conjugate first orders.
///
/// `f0` always lies in the half-plane `fx > 0` (or `fx == 0, fy > 0`);
/// the phase carried by the `f0` lobe has the same sign as the phase of the
/// fringe term `cos(2π f0·r + φ)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderLocation {
    /// `(fx, fy)` of the selected order in cycles/mm
    pub f0: (f64, f64),
    /// `(fx, fy)` of its conjugate in cycles/mm
    pub f1: (f64, f64),
    /// `ln(peak / dc)` measured when the orders were found
    pub prominence: f64,
}

impl OrderLocation {
    /// Build a location from a known carrier, with a perfectly mirrored conjugate.
    pub fn from_carrier(fx: f64, fy: f64) -> Self {
        Self {
            f0: (fx, fy),
            f1: (-fx, -fy),
            prominence: 0.0,
        }
    }

    /// `|f0 + f1|` in cycles/mm; zero for a perfectly symmetric pair.
    pub fn asymmetry(&self) -> f64 {
        (self.f0.0 + self.f1.0).hypot(self.f0.1 + self.f1.1)
    }

    /// Carrier fringe frequency `|f0|` in cycles/mm.
    pub fn carrier_frequency(&self) -> f64 {
        self.f0.0.hypot(self.f0.1)
    }
}

/// Find the carrier order and its conjugate.
///
/// # Arguments
/// * `freq` - Fourier-plane grid matching the spectrum
/// * `log_spectrum` - centred log-magnitude spectrum
/// * `config` - exclusion radius and prominence threshold
///
/// # Errors
/// `OrderNotFound` when the strongest candidate is not `min_log_ratio`
/// above the DC bin, `ShapeMismatch` if grid and spectrum disagree.
pub fn locate_orders(
    freq: &Grid,
    log_spectrum: &ArrayView2<f64>,
    config: &LocatorConfig,
) -> Result<OrderLocation> {
    let (rows, cols) = freq.shape();
    if log_spectrum.dim() != (rows, cols) {
        return Err(Error::ShapeMismatch {
            expected: (rows, cols),
            got: log_spectrum.dim(),
        });
    }

    let (cr, cc) = freq.origin();
    let (dfx, dfy) = freq.spacing;
    let nyquist = ((cols / 2) as f64 * dfx).min((rows / 2) as f64 * dfy);
    let exclusion = config.dc_exclusion * nyquist;
    let dc = log_spectrum[[cr, cc]];

    let mut best: Option<((usize, usize), f64)> = None;
    for ((i, j), &v) in log_spectrum.indexed_iter() {
        let in_half_plane = j > cc || (j == cc && i > cr);
        if !in_half_plane || !v.is_finite() {
            continue;
        }
        if freq.xx[[i, j]].hypot(freq.yy[[i, j]]) <= exclusion {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some(((i, j), v));
        }
    }

    let Some(((i0, j0), peak)) = best else {
        return Err(Error::OrderNotFound {
            prominence: f64::NEG_INFINITY,
            threshold: config.min_log_ratio,
        });
    };

    let prominence = peak - dc;
    if !(prominence >= config.min_log_ratio) {
        return Err(Error::OrderNotFound {
            prominence,
            threshold: config.min_log_ratio,
        });
    }

    // Conjugate: strongest bin in the 3x3 neighbourhood of the mirrored index
    let mi = (2 * cr).saturating_sub(i0).min(rows - 1);
    let mj = (2 * cc).saturating_sub(j0).min(cols - 1);
    let mut conj = (mi, mj);
    for i in mi.saturating_sub(1)..=(mi + 1).min(rows - 1) {
        for j in mj.saturating_sub(1)..=(mj + 1).min(cols - 1) {
            if log_spectrum[[i, j]] > log_spectrum[conj] {
                conj = (i, j);
            }
        }
    }

    let location = OrderLocation {
        f0: (freq.xx[[i0, j0]], freq.yy[[i0, j0]]),
        f1: (freq.xx[conj], freq.yy[conj]),
        prominence,
    };

    let skew_bins = ((location.f0.0 + location.f1.0) / dfx)
        .hypot((location.f0.1 + location.f1.1) / dfy);
    if skew_bins > config.asymmetry_tolerance {
        warn!(
            "first orders asymmetric by {skew_bins:.1} bins: f0={:?} f1={:?}",
            location.f0, location.f1
        );
    }
    debug!(
        "located orders f0=({:.3}, {:.3}) cyc/mm, prominence {prominence:.2}",
        location.f0.0, location.f0.1
    );

    Ok(location)
}
