//! Deformable-mirror calibration from interferometric poke data.
//!
//! A [`poke::PokeSequence`] pairs actuator commands with the interferograms
//! recorded for them. [`regls::RegLSCalib`] runs every frame through an
//! [`interf::FringeAnalysis`], projects the phase onto a [`basis::PhaseBasis`]
//! and fits the regularized inverse that maps basis coefficients back to
//! voltages. The result is a [`model::CalibrationModel`], stored with its
//! inputs in a [`model::CalibrationFile`] and optionally exported as plain
//! text.

pub mod basis;
pub mod dataset;
pub mod error;
pub mod export;
pub mod layout;
pub mod model;
pub mod poke;
pub mod regls;
pub mod storage;

pub use basis::{BasisConfig, PhaseBasis};
pub use dataset::PokeDataset;
pub use error::{CalibrationError, Result};
pub use layout::{ActuatorLayout, Preset};
pub use model::{CalibrationFile, CalibrationModel};
pub use poke::PokeSequence;
pub use regls::{CalibConfig, CalibrationRun, RegLSCalib, Regularization};
