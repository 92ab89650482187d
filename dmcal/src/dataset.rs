//! Recorded poke datasets.

use std::path::Path;

use log::info;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use interf::PixelSize;

use crate::error::{CalibrationError, Result};
use crate::poke::PokeSequence;
use crate::storage;

/// Frames recorded for a poke sequence plus the alignment frames taken with
/// preset patterns on the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokeDataset {
    pub dm_name: String,
    pub pixel_size: PixelSize,
    pub wavelength_nm: f64,
    /// `num_actuators x num_steps`
    pub u: Array2<f64>,
    /// `num_steps x rows x cols`
    pub images: Array3<u16>,
    /// One frame per entry of `align_names`
    pub align_images: Array3<u16>,
    pub align_names: Vec<String>,
}

impl PokeDataset {
    /// # Errors
    /// `InvalidInput` on mismatched step counts, frame shapes or alignment names.
    pub fn validate(&self) -> Result<()> {
        let steps = self.images.len_of(Axis(0));
        if self.u.ncols() != steps {
            return Err(CalibrationError::InvalidInput(format!(
                "U has {} steps but there are {steps} images",
                self.u.ncols()
            )));
        }
        if self.align_images.len_of(Axis(0)) != self.align_names.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} alignment frames for {} names",
                self.align_images.len_of(Axis(0)),
                self.align_names.len()
            )));
        }
        let frame = |a: &Array3<u16>| (a.shape()[1], a.shape()[2]);
        if !self.align_names.is_empty() && frame(&self.align_images) != frame(&self.images) {
            return Err(CalibrationError::InvalidInput(format!(
                "alignment frames are {:?}, data frames {:?}",
                frame(&self.align_images),
                frame(&self.images)
            )));
        }
        Ok(())
    }

    pub fn image_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.images.dim();
        (rows, cols)
    }

    /// First data frame, taken with every actuator at rest.
    pub fn rest_image(&self) -> ArrayView2<'_, u16> {
        self.images.slice(s![0, .., ..])
    }

    /// Alignment frame recorded under preset `name`.
    pub fn align_image(&self, name: &str) -> Result<ArrayView2<'_, u16>> {
        let k = self
            .align_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| {
                CalibrationError::InvalidInput(format!(
                    "no alignment frame named {name:?} (have {:?})",
                    self.align_names
                ))
            })?;
        Ok(self.align_images.slice(s![k, .., ..]))
    }

    pub fn poke_sequence(&self) -> Result<PokeSequence> {
        PokeSequence::new(self.u.clone(), self.images.clone())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        storage::save(self, path)?;
        info!(
            "saved {} dataset: {} steps of {:?} frames to {}",
            self.dm_name,
            self.u.ncols(),
            self.image_shape(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let dataset: Self = storage::load(path)?;
        dataset.validate()?;
        Ok(dataset)
    }
}
