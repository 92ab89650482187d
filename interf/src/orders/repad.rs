//! Zero-padding an extracted order onto a canonical spectrum.
//!
//! The crop centre is placed on the zero-frequency bin of an `M`-sized
//! canonical spectrum. Whatever bin the order was cut from, the inverse
//! transform then samples the camera field at pitch `1 / (M df)` with the
//! carrier removed.

use log::debug;
use ndarray::{s, Array2};
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::grid::{camera_grid, Grid, PixelSize};
use crate::orders::extract::ExtractedOrder;

/// Canonical-size spectrum ready for the inverse transform.
#[derive(Debug, Clone, PartialEq)]
pub struct RepaddedOrder {
    pub spectrum: Array2<Complex64>,
    /// Camera-plane grid the inverse transform samples, in mm
    pub grid: Grid,
    /// Sampling pitch of the phase map
    pub pitch: PixelSize,
    /// `canonical_area / image_area`, the factor that makes the recovered
    /// magnitude independent of the canonical size
    pub scale: f64,
}

/// Output sampling pitch for a canonical size on a Fourier grid.
pub fn canonical_pitch(freq: &Grid, canonical: (usize, usize)) -> PixelSize {
    let (dfx, dfy) = freq.spacing;
    PixelSize::new(
        1e3 / (canonical.1 as f64 * dfx),
        1e3 / (canonical.0 as f64 * dfy),
    )
}

/// Phase-map grid produced by repadding onto `canonical` bins.
pub fn canonical_grid(freq: &Grid, canonical: (usize, usize)) -> Result<Grid> {
    camera_grid(canonical, canonical_pitch(freq, canonical))
}

/// Place `order` on a zero-filled `canonical` spectrum.
///
/// # Errors
/// `RepadOverflow` if the crop is larger than `canonical` on either axis.
pub fn repad_order(
    order: &ExtractedOrder,
    freq: &Grid,
    canonical: (usize, usize),
) -> Result<RepaddedOrder> {
    let (cr, cc) = order.shape();
    let (mr, mc) = canonical;
    if cr > mr || cc > mc {
        return Err(Error::RepadOverflow {
            got: (cr, cc),
            canonical,
        });
    }

    let grid = canonical_grid(freq, canonical)?;
    let (nr, nc) = freq.shape();
    let scale = (mr * mc) as f64 / (nr * nc) as f64;
    let pitch = canonical_pitch(freq, canonical);

    let spectrum = if (cr, cc) == canonical {
        order.spectrum.clone()
    } else {
        let r0 = mr / 2 - cr / 2;
        let c0 = mc / 2 - cc / 2;
        let mut padded = Array2::<Complex64>::zeros(canonical);
        padded
            .slice_mut(s![r0..r0 + cr, c0..c0 + cc])
            .assign(&order.spectrum);
        padded
    };

    debug!(
        "repadded {cr}x{cc} crop onto {mr}x{mc}, pitch ({:.2}, {:.2}) um",
        pitch.x_um, pitch.y_um
    );

    Ok(RepaddedOrder {
        spectrum,
        grid,
        pitch,
        scale,
    })
}
