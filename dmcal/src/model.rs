//! Calibration results and the file they are stored in.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::info;
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

use interf::{Aperture, FringeAnalysis, OrderLocation, PixelSize};

use crate::basis::BasisConfig;
use crate::error::Result;
use crate::poke::PokeSequence;
use crate::regls::{CalibConfig, CalibrationRun, Regularization};
use crate::storage;

/// Linear model from basis coefficients to actuator voltages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    /// Rest-state coefficients, length `k`
    pub z0: Array1<f64>,
    /// Control matrix, `num_actuators x k`
    pub c: Array2<f64>,
    /// Command that flattens the rest state, length `num_actuators`
    pub uflat: Array1<f64>,
}

impl CalibrationModel {
    pub fn num_actuators(&self) -> usize {
        self.c.nrows()
    }

    pub fn num_modes(&self) -> usize {
        self.c.ncols()
    }

    /// Voltages that add `coeffs` on top of the flat command.
    pub fn command_for(&self, coeffs: &Array1<f64>) -> Array1<f64> {
        &self.uflat + &self.c.dot(coeffs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub created: DateTime<Utc>,
    pub software: String,
    pub version: String,
}

impl Provenance {
    pub fn now() -> Self {
        Self {
            created: Utc::now(),
            software: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A calibration together with every input needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub dm_name: String,
    pub image_shape: (usize, usize),
    pub pixel_size: PixelSize,
    pub wavelength_nm: f64,
    pub pupil_radius_um: f64,
    pub aperture: Aperture,
    pub orders: OrderLocation,
    pub basis: BasisConfig,
    pub regularization: Regularization,
    pub u: Array2<f64>,
    pub images: Array3<u16>,
    pub model: CalibrationModel,
    pub provenance: Provenance,
}

impl CalibrationFile {
    pub fn new(
        dm_name: &str,
        sequence: &PokeSequence,
        analysis: &FringeAnalysis,
        config: &CalibConfig,
        pupil_radius_um: f64,
        run: CalibrationRun,
    ) -> Self {
        Self {
            dm_name: dm_name.to_string(),
            image_shape: sequence.image_shape(),
            pixel_size: analysis.pixel_size(),
            wavelength_nm: config.wavelength_nm,
            pupil_radius_um,
            aperture: run.aperture,
            orders: run.orders,
            basis: config.basis,
            regularization: config.regularization,
            u: sequence.u.clone(),
            images: sequence.images.clone(),
            model: run.model,
            provenance: Provenance::now(),
        }
    }

    /// Atomic write; `.bin` selects bincode, anything else JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        storage::save(self, path)?;
        info!(
            "saved {} calibration ({} actuators, {} modes) to {}",
            self.dm_name,
            self.model.num_actuators(),
            self.model.num_modes(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        storage::load(path)
    }

    /// Default file name, `<DM>_<r>um_CAL.json`.
    pub fn file_name(dm_name: &str, pupil_radius_um: f64) -> String {
        format!("{dm_name}_{pupil_radius_um}um_CAL.json")
    }
}
