//! Centred 2-D discrete Fourier transform.
//!
//! Forward: DFT then [`fftshift`], so the zero-frequency bin lands on the
//! origin of [`crate::grid::fourier_grid`]. Inverse: [`ifftshift`] then the
//! inverse DFT scaled by `1 / (rows * cols)`, making
//! `inverse(forward(x)) == x` up to rounding.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use crate::error::{Error, Result};

/// Planned forward/inverse 2-D transforms for one array shape.
///
/// Plans are shared through `Arc`, so cloning is cheap and clones can run on
/// different threads.
#[derive(Clone)]
pub struct SpectralTransform {
    shape: (usize, usize),
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("shape", &self.shape)
            .finish()
    }
}

impl SpectralTransform {
    pub fn new(shape: (usize, usize)) -> Result<Self> {
        let (rows, cols) = shape;
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidGrid(format!(
                "cannot plan a transform for shape {shape:?}"
            )));
        }
        let mut planner = FftPlanner::new();
        Ok(Self {
            shape,
            row_forward: planner.plan_fft_forward(cols),
            row_inverse: planner.plan_fft_inverse(cols),
            col_forward: planner.plan_fft_forward(rows),
            col_inverse: planner.plan_fft_inverse(rows),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn check_shape(&self, got: (usize, usize)) -> Result<()> {
        if got != self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                got,
            });
        }
        Ok(())
    }

    /// Forward transform of a real image.
    pub fn forward_real<T>(&self, image: &ArrayView2<T>) -> Result<Array2<Complex64>>
    where
        T: Copy + Into<f64>,
    {
        self.check_shape(image.dim())?;
        let data = Array2::from_shape_fn(self.shape, |ij| Complex64::new(image[ij].into(), 0.0));
        Ok(fftshift(&self.transform(data, false).view()))
    }

    /// Forward transform of a complex field.
    pub fn forward(&self, field: &ArrayView2<Complex64>) -> Result<Array2<Complex64>> {
        self.check_shape(field.dim())?;
        Ok(fftshift(&self.transform(field.to_owned(), false).view()))
    }

    /// Exact adjoint of [`SpectralTransform::forward`].
    pub fn inverse(&self, spectrum: &ArrayView2<Complex64>) -> Result<Array2<Complex64>> {
        self.check_shape(spectrum.dim())?;
        let (rows, cols) = self.shape;
        let norm = 1.0 / (rows * cols) as f64;
        let mut out = self.transform(ifftshift(spectrum), true);
        out.mapv_inplace(|z| z * norm);
        Ok(out)
    }

    /// Row pass, then column pass on the transposed copy.
    fn transform(&self, data: Array2<Complex64>, inverse: bool) -> Array2<Complex64> {
        let (row_fft, col_fft) = if inverse {
            (&self.row_inverse, &self.col_inverse)
        } else {
            (&self.row_forward, &self.col_forward)
        };

        let mut data = data.as_standard_layout().into_owned();
        if let Some(buf) = data.as_slice_mut() {
            row_fft.process(buf);
        }

        let mut transposed = data.t().as_standard_layout().into_owned();
        if let Some(buf) = transposed.as_slice_mut() {
            col_fft.process(buf);
        }

        transposed.t().as_standard_layout().into_owned()
    }
}

fn roll<T: Clone>(a: &ArrayView2<T>, shift_rows: usize, shift_cols: usize) -> Array2<T> {
    let (rows, cols) = a.dim();
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        a[[
            (i + rows - shift_rows % rows) % rows,
            (j + cols - shift_cols % cols) % cols,
        ]]
        .clone()
    })
}

/// Move the zero-frequency bin from index 0 to index `n / 2` on both axes.
pub fn fftshift<T: Clone>(a: &ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = a.dim();
    roll(a, rows / 2, cols / 2)
}

/// Inverse of [`fftshift`], also for odd sizes.
pub fn ifftshift<T: Clone>(a: &ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = a.dim();
    roll(a, rows - rows / 2, cols - cols / 2)
}

/// Natural log of the spectrum magnitude, floored so empty bins stay finite.
pub fn log_magnitude(spectrum: &ArrayView2<Complex64>) -> Array2<f64> {
    let floor = f64::MIN_POSITIVE.ln();
    spectrum.mapv(|z| {
        let m = z.norm();
        if m > 0.0 {
            m.ln()
        } else {
            floor
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::f64::consts::PI;

    fn random_field(shape: (usize, usize), seed: u64) -> Array2<Complex64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn(shape, |_| {
            Complex64::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0))
        })
    }

    #[test]
    fn test_round_trip_identity() {
        for shape in [(16, 16), (12, 20), (7, 9)] {
            let fft = SpectralTransform::new(shape).unwrap();
            let x = random_field(shape, 42);
            let back = fft.inverse(&fft.forward(&x.view()).unwrap().view()).unwrap();
            for (a, b) in x.iter().zip(back.iter()) {
                assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
                assert_relative_eq!(a.im, b.im, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_dc_lands_on_center() {
        let fft = SpectralTransform::new((8, 10)).unwrap();
        let image = Array2::from_elem((8, 10), 2.0_f64);
        let spec = fft.forward_real(&image.view()).unwrap();
        assert_relative_eq!(spec[[4, 5]].re, 160.0, epsilon = 1e-9);
        let off_dc: f64 = spec
            .indexed_iter()
            .filter(|((i, j), _)| (*i, *j) != (4, 5))
            .map(|(_, z)| z.norm())
            .sum();
        assert!(off_dc < 1e-9);
    }

    #[test]
    fn test_carrier_peak_position() {
        // A pure tone at +3 bins in x must appear three columns right of centre
        let (rows, cols) = (16, 32);
        let fft = SpectralTransform::new((rows, cols)).unwrap();
        let image = Array2::from_shape_fn((rows, cols), |(_, j)| {
            (2.0 * PI * 3.0 * j as f64 / cols as f64).cos()
        });
        let spec = fft.forward_real(&image.view()).unwrap();
        let logm = log_magnitude(&spec.view());
        let (peak, _) = logm
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert!(peak == (8, 19) || peak == (8, 13), "peak at {peak:?}");
        assert_relative_eq!(spec[[8, 19]].norm(), spec[[8, 13]].norm(), epsilon = 1e-9);
    }

    #[test]
    fn test_shift_inverse_odd_sizes() {
        let a = Array2::from_shape_fn((5, 3), |(i, j)| (i * 3 + j) as f64);
        let back = ifftshift(&fftshift(&a.view()).view());
        assert_eq!(a, back);
        // numpy: fftshift moves index 0 to n // 2
        let shifted = fftshift(&a.view());
        assert_eq!(shifted[[2, 1]], a[[0, 0]]);
    }

    #[test]
    fn test_shape_mismatch() {
        let fft = SpectralTransform::new((4, 4)).unwrap();
        let x = Array2::<f64>::zeros((4, 5));
        assert!(matches!(
            fft.forward_real(&x.view()),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_log_magnitude_floor() {
        let spec = Array2::from_elem((2, 2), Complex64::new(0.0, 0.0));
        let logm = log_magnitude(&spec.view());
        assert!(logm.iter().all(|v| v.is_finite()));
    }
}
