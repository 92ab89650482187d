//! Cropping one first-order lobe out of the full spectrum.

use std::ops::Range;

use log::debug;
use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{Extent, Grid, PixelSize};

/// Window geometry for [`extract_order`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Window half-width as a fraction of the carrier frequency. `0.5` is the
    /// largest lobe that cannot reach the DC term.
    pub lobe_fraction: f64,
    /// Zero bins outside the ellipse inscribed in the window
    pub elliptical_mask: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            lobe_fraction: 0.5,
            elliptical_mask: true,
        }
    }
}

/// Sub-spectrum cut around one order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedOrder {
    pub spectrum: Array2<Complex64>,
    /// Fourier extent of the crop in cycles/mm
    pub extent: Extent,
    /// Row range of the crop in the full spectrum
    pub rows: Range<usize>,
    /// Column range of the crop in the full spectrum
    pub cols: Range<usize>,
}

impl ExtractedOrder {
    pub fn shape(&self) -> (usize, usize) {
        self.spectrum.dim()
    }
}

/// Crop a `(2 hy + 1) x (2 hx + 1)` window centred on the bin nearest `order`.
///
/// The half-width is `lobe_fraction * |order|`, converted to whole bins per
/// axis. The pixel size bounds the window by the sampling Nyquist frequency.
///
/// # Errors
/// `OrderOutOfBounds` if the window is empty, crosses Nyquist, or leaves the
/// spectrum.
pub fn extract_order(
    spectrum: &ArrayView2<Complex64>,
    freq: &Grid,
    order: (f64, f64),
    pixel: PixelSize,
    config: &ExtractorConfig,
) -> Result<ExtractedOrder> {
    let (rows, cols) = freq.shape();
    if spectrum.dim() != (rows, cols) {
        return Err(Error::ShapeMismatch {
            expected: (rows, cols),
            got: spectrum.dim(),
        });
    }

    let (fx, fy) = order;
    let (dfx, dfy) = freq.spacing;
    let half_width = config.lobe_fraction * fx.hypot(fy);
    // Tolerate rounding when the half-width is an exact bin multiple
    let hx = (half_width / dfx + 1e-9).floor();
    let hy = (half_width / dfy + 1e-9).floor();
    if !(hx >= 1.0 && hy >= 1.0) {
        return Err(Error::OrderOutOfBounds(format!(
            "lobe half-width {half_width:.3} cyc/mm is below one frequency bin"
        )));
    }

    let (px, py) = pixel.to_mm();
    let (nyq_x, nyq_y) = (0.5 / px, 0.5 / py);
    if fx.abs() + hx * dfx > nyq_x || fy.abs() + hy * dfy > nyq_y {
        return Err(Error::OrderOutOfBounds(format!(
            "window around ({fx:.3}, {fy:.3}) cyc/mm crosses Nyquist ({nyq_x:.3}, {nyq_y:.3})"
        )));
    }

    let (hx, hy) = (hx as usize, hy as usize);
    let Some((ci, cj)) = freq.index_of(fx, fy) else {
        return Err(Error::OrderOutOfBounds(format!(
            "order ({fx:.3}, {fy:.3}) cyc/mm lies outside the spectrum"
        )));
    };
    if ci < hy || cj < hx || ci + hy >= rows || cj + hx >= cols {
        return Err(Error::OrderOutOfBounds(format!(
            "window of {}x{} bins around bin ({ci}, {cj}) leaves the {rows}x{cols} spectrum",
            2 * hy + 1,
            2 * hx + 1
        )));
    }

    let row_range = ci - hy..ci + hy + 1;
    let col_range = cj - hx..cj + hx + 1;
    let mut crop = spectrum
        .slice(s![row_range.clone(), col_range.clone()])
        .to_owned();

    if config.elliptical_mask {
        let (ax, ay) = (hx as f64, hy as f64);
        for ((i, j), z) in crop.indexed_iter_mut() {
            let u = (j as f64 - ax) / ax;
            let v = (i as f64 - ay) / ay;
            if u * u + v * v > 1.0 {
                *z = Complex64::new(0.0, 0.0);
            }
        }
    }

    let extent = Extent {
        xmin: freq.xx[[0, col_range.start]],
        xmax: freq.xx[[0, col_range.end - 1]],
        ymin: freq.yy[[row_range.start, 0]],
        ymax: freq.yy[[row_range.end - 1, 0]],
    };
    debug!(
        "extracted {}x{} bins around ({ci}, {cj})",
        row_range.len(),
        col_range.len()
    );

    Ok(ExtractedOrder {
        spectrum: crop,
        extent,
        rows: row_range,
        cols: col_range,
    })
}
