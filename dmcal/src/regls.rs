//! Regularized least-squares actuator calibration.
//!
//! Every frame of a poke sequence is turned into a coefficient vector in a
//! [`PhaseBasis`]. With `Z` the coefficients and `U` the commands:
//!
//! ```text
//! z0 = mean of rest-frame coefficients
//! D  = Z - z0 1ᵀ
//! H  = D Uᵀ (U Uᵀ + λ I)⁻¹                 influence matrix
//! C  = V diag(s / (s² + μ)) Wᵀ              with H = W S Vᵀ
//! uflat = -C z0
//! ```
//!
//! `C` maps a coefficient vector to the voltages that produce it, so
//! `uflat` is the command that cancels the rest-state aberration.

use std::f64::consts::PI;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use interf::{AnalyseOptions, Aperture, FringeAnalysis, OrderLocation, PixelSize};

use crate::basis::{BasisConfig, PhaseBasis};
use crate::error::{CalibrationError, Result};
use crate::model::CalibrationModel;
use crate::poke::PokeSequence;

/// Relative regularization strengths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regularization {
    /// Ridge weight of the influence fit, relative to `trace(U Uᵀ) / n`
    pub fit_lambda: f64,
    /// Tikhonov damping of the inverse, relative to the largest squared
    /// singular value of the influence matrix
    pub inverse_damping: f64,
}

impl Default for Regularization {
    fn default() -> Self {
        Self {
            fit_lambda: 1e-6,
            inverse_damping: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibConfig {
    pub wavelength_nm: f64,
    pub basis: BasisConfig,
    pub regularization: Regularization,
    /// Analyse frames on the rayon pool
    pub parallel: bool,
    /// Frames analysed between status reports
    pub chunk_size: usize,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            wavelength_nm: 775.0,
            basis: BasisConfig::default(),
            regularization: Regularization::default(),
            parallel: true,
            chunk_size: 16,
        }
    }
}

/// Result of [`RegLSCalib::calibrate`] with the state it was derived under.
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    pub model: CalibrationModel,
    pub orders: OrderLocation,
    pub aperture: Aperture,
    /// Fitted influence matrix `H`, `k x n`
    pub influence: Array2<f64>,
    /// Residues inside the pupil, per step
    pub residues: Vec<usize>,
}

/// Progress reporting that survives a panicking callback.
struct Status<'a> {
    callback: Option<&'a mut dyn FnMut(&str)>,
}

impl Status<'_> {
    fn report(&mut self, message: &str) {
        info!("{message}");
        if let Some(callback) = self.callback.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!("status callback panicked on {message:?}; continuing");
            }
        }
    }
}

pub struct RegLSCalib {
    config: CalibConfig,
}

impl RegLSCalib {
    pub fn new(config: CalibConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibConfig {
        &self.config
    }

    /// Fit a calibration model to a poke sequence.
    ///
    /// `analysis` must have its pupil set. When it has no cached orders they
    /// are located on the first rest frame. The caller's instance is left
    /// untouched; each worker analyses frames on its own clone.
    pub fn calibrate(
        &self,
        sequence: &PokeSequence,
        analysis: &FringeAnalysis,
        pixel_size: PixelSize,
        status: Option<&mut dyn FnMut(&str)>,
    ) -> Result<CalibrationRun> {
        let mut status = Status { callback: status };
        let (aperture, rest) = self.validate(sequence, analysis, pixel_size)?;

        let mut template = analysis.clone();
        let orders = match template.orders() {
            Some(orders) => orders,
            None => {
                let step = rest[0];
                status.report(&format!("locating orders on rest frame {step}"));
                let options = AnalyseOptions {
                    auto_find_orders: true,
                    do_unwrap: false,
                    ..Default::default()
                };
                template
                    .analyse(&sequence.image(step), options)
                    .map_err(|e| frame_error(step, e))?
                    .orders
            }
        };

        let basis = self
            .config
            .basis
            .build(template.phase_grid(), &aperture)?;
        status.report(&format!(
            "projecting {} frames onto {} {} modes",
            sequence.num_steps(),
            basis.dim(),
            basis.name()
        ));

        let (z, residues) = self.project_frames(sequence, &template, basis.as_ref(), &mut status)?;
        let degraded = residues.iter().filter(|r| **r > 0).count();
        if degraded > 0 {
            warn!("{degraded} of {} frames have residues inside the pupil", residues.len());
        }

        status.report("fitting influence matrix");
        let z0 = mean_columns(&z, &rest);
        let d = DMatrix::from_fn(z.nrows(), z.ncols(), |r, c| z[(r, c)] - z0[r]);
        let u = to_dmatrix(&sequence.u.view());
        let reg = self.config.regularization;
        let h = fit_influence(&d, &u, reg.fit_lambda)?;

        status.report("inverting influence matrix");
        let c = damped_pseudo_inverse(&h, reg.inverse_damping)?;
        let uflat = -(&c * &z0);
        ensure_finite("flat command", uflat.iter())?;
        info!(
            "calibration done: C is {}x{}, |uflat| = {:.4}",
            c.nrows(),
            c.ncols(),
            uflat.norm()
        );

        Ok(CalibrationRun {
            model: CalibrationModel {
                z0: Array1::from_iter(z0.iter().copied()),
                c: to_array2(&c),
                uflat: Array1::from_iter(uflat.iter().copied()),
            },
            orders,
            aperture,
            influence: to_array2(&h),
            residues,
        })
    }

    /// Checks run before any frame is analysed. Returns the pupil and the
    /// rest steps.
    fn validate(
        &self,
        sequence: &PokeSequence,
        analysis: &FringeAnalysis,
        pixel_size: PixelSize,
    ) -> Result<(Aperture, Vec<usize>)> {
        let wl = self.config.wavelength_nm;
        if !(wl.is_finite() && wl > 0.0) {
            return Err(CalibrationError::InvalidInput(format!(
                "wavelength must be positive, got {wl} nm"
            )));
        }
        if pixel_size != analysis.pixel_size() {
            return Err(CalibrationError::InvalidInput(format!(
                "pixel size {pixel_size:?} differs from the analysis {:?}",
                analysis.pixel_size()
            )));
        }
        let expected = analysis.config().image_shape;
        if sequence.image_shape() != expected {
            return Err(interf::Error::ShapeMismatch {
                expected,
                got: sequence.image_shape(),
            }
            .into());
        }

        let aperture = analysis.aperture().ok_or_else(|| {
            CalibrationError::ApertureMismatch("no aperture configured".to_string())
        })?;
        let extent = analysis.phase_grid().extent;
        if !aperture.fits(&extent) {
            return Err(CalibrationError::ApertureMismatch(format!(
                "pupil r={:.3} mm at ({:.3}, {:.3}) outside phase extent {:?}",
                aperture.radius,
                aperture.cx,
                aperture.cy,
                extent.as_tuple()
            )));
        }

        if let Some((k, count)) = sequence
            .pokes_per_actuator()
            .into_iter()
            .enumerate()
            .find(|(_, count)| *count < 2)
        {
            return Err(CalibrationError::InsufficientData(format!(
                "actuator {k} is poked in {count} steps, need at least 2"
            )));
        }
        let rest = sequence.rest_steps();
        if rest.is_empty() {
            return Err(CalibrationError::InsufficientData(
                "no rest step in the sequence".to_string(),
            ));
        }
        debug!(
            "validated {} actuators x {} steps, {} rest steps",
            sequence.num_actuators(),
            sequence.num_steps(),
            rest.len()
        );
        Ok((aperture, rest))
    }

    /// Coefficient matrix `k x steps` and per-step residue counts.
    fn project_frames(
        &self,
        sequence: &PokeSequence,
        template: &FringeAnalysis,
        basis: &dyn PhaseBasis,
        status: &mut Status<'_>,
    ) -> Result<(DMatrix<f64>, Vec<usize>)> {
        let steps: Vec<usize> = (0..sequence.num_steps()).collect();
        let to_nm = self.config.wavelength_nm / (2.0 * PI);
        let chunk_size = self.config.chunk_size.max(1);

        let mut frames = Vec::with_capacity(steps.len());
        for chunk in steps.chunks(chunk_size) {
            let analyse = |fa: &mut FringeAnalysis, step: usize| {
                analyse_step(fa, &sequence.image(step), step, to_nm, basis)
            };
            let results: Vec<Result<(DVector<f64>, usize)>> = if self.config.parallel {
                chunk
                    .par_iter()
                    .map_init(|| template.clone(), |fa, &step| analyse(fa, step))
                    .collect()
            } else {
                let mut fa = template.clone();
                chunk.iter().map(|&step| analyse(&mut fa, step)).collect()
            };
            for result in results {
                frames.push(result?);
            }
            status.report(&format!("analysed {}/{} frames", frames.len(), steps.len()));
        }

        let z = DMatrix::from_fn(basis.dim(), frames.len(), |r, c| frames[c].0[r]);
        ensure_finite("coefficients", z.iter())?;
        Ok((z, frames.into_iter().map(|(_, res)| res).collect()))
    }
}

fn analyse_step(
    fa: &mut FringeAnalysis,
    image: &ArrayView2<u16>,
    step: usize,
    to_nm: f64,
    basis: &dyn PhaseBasis,
) -> Result<(DVector<f64>, usize)> {
    let options = AnalyseOptions {
        use_mask: true,
        ..Default::default()
    };
    let products = fa.analyse(image, options).map_err(|e| frame_error(step, e))?;
    let phase_nm = products.phase().mapv(|p| p * to_nm);
    let coeffs = basis.project(&phase_nm.view()).map_err(|e| match e {
        CalibrationError::Pipeline(source) => frame_error(step, source),
        CalibrationError::InsufficientData(msg) => {
            CalibrationError::InsufficientData(format!("step {step}: {msg}"))
        }
        other => other,
    })?;
    debug!("step {step}: {} residues", products.residues);
    Ok((coeffs, products.residues))
}

fn frame_error(step: usize, source: interf::Error) -> CalibrationError {
    CalibrationError::Frame {
        step,
        source: source.with_frame(step),
    }
}

fn mean_columns(z: &DMatrix<f64>, columns: &[usize]) -> DVector<f64> {
    let mut mean = DVector::zeros(z.nrows());
    for &c in columns {
        mean += z.column(c);
    }
    mean / columns.len() as f64
}

/// Ridge estimate of `H` in `D ≈ H U`.
///
/// Solves `(U Uᵀ + λ I) Hᵀ = U Dᵀ` by Cholesky, falling back to an SVD
/// pseudo-inverse when the system is not positive definite. `lambda_rel`
/// scales with the mean command energy `trace(U Uᵀ) / n`.
pub fn fit_influence(d: &DMatrix<f64>, u: &DMatrix<f64>, lambda_rel: f64) -> Result<DMatrix<f64>> {
    if d.ncols() != u.ncols() {
        return Err(CalibrationError::InvalidInput(format!(
            "{} coefficient columns for {} command columns",
            d.ncols(),
            u.ncols()
        )));
    }
    let n = u.nrows();
    let mut gram = u * u.transpose();
    let lambda = lambda_rel * gram.trace() / n as f64;
    for i in 0..n {
        gram[(i, i)] += lambda;
    }
    ensure_finite("U Uᵀ", gram.iter())?;
    let rhs = u * d.transpose();

    let ht = match gram.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => {
            warn!("U Uᵀ + λI is not positive definite; using the SVD pseudo-inverse");
            let pinv = gram
                .pseudo_inverse(f64::EPSILON * n as f64)
                .map_err(|e| CalibrationError::NumericInstability(e.to_string()))?;
            pinv * rhs
        }
    };
    let h = ht.transpose();
    ensure_finite("influence matrix", h.iter())?;
    Ok(h)
}

/// Tikhonov-damped pseudo-inverse `V diag(s / (s² + μ)) Wᵀ` of `h = W S Vᵀ`.
///
/// `damping_rel` scales with the largest squared singular value. At zero
/// damping, singular values below the usual rank tolerance are dropped.
pub fn damped_pseudo_inverse(h: &DMatrix<f64>, damping_rel: f64) -> Result<DMatrix<f64>> {
    if !(damping_rel.is_finite() && damping_rel >= 0.0) {
        return Err(CalibrationError::InvalidInput(format!(
            "inverse damping must be non-negative, got {damping_rel}"
        )));
    }
    ensure_finite("influence matrix", h.iter())?;
    let svd = h.clone().svd(true, true);
    let (Some(w), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return Err(CalibrationError::NumericInstability(
            "SVD did not return singular vectors".to_string(),
        ));
    };
    let s = &svd.singular_values;
    let s_max = s.max();
    if !(s_max > 0.0) {
        return Err(CalibrationError::NumericInstability(
            "influence matrix is zero".to_string(),
        ));
    }
    let mu = damping_rel * s_max * s_max;
    let tol = s_max * h.nrows().max(h.ncols()) as f64 * f64::EPSILON;
    let gains = s.map(|si| {
        if mu == 0.0 && si <= tol {
            0.0
        } else {
            si / (si * si + mu)
        }
    });
    debug!(
        "influence singular values {:.3e}..{:.3e}, damping {mu:.3e}",
        s.min(),
        s_max
    );

    let c = v_t.transpose() * DMatrix::from_diagonal(&gains) * w.transpose();
    ensure_finite("control matrix", c.iter())?;
    Ok(c)
}

fn ensure_finite<'a>(what: &str, mut values: impl Iterator<Item = &'a f64>) -> Result<()> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(CalibrationError::NumericInstability(format!(
            "non-finite values in {what}"
        )))
    }
}

pub(crate) fn to_dmatrix(a: &ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |r, c| a[[r, c]])
}

pub(crate) fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(r, c)| m[(r, c)])
}
