//! Simulated interferometer looking at a simulated mirror.
//!
//! The camera and the mirror share the actuator state: whatever the
//! [`SimulatedDm`] was last sent shapes the next frame the
//! [`SimulatedInterferometer`] renders.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use dmcal::layout::{ActuatorLayout, DEFAULT_ROLL};
use interf::synthetic::FringeModel;
use interf::{Aperture, Grid, PixelSize};
use log::debug;
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::camera::FrameSource;
use crate::dm::ActuatorSink;
use crate::error::{DeviceError, Result};

type SharedCommand = Arc<Mutex<Vec<f64>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub fringe: FringeModel,
    pub wavelength_nm: f64,
    /// Surface height in nm per unit command at an actuator centre
    pub stroke_nm: f64,
    pub roll: f64,
    /// Static defocus at the pupil edge, radians
    pub defocus_rad: f64,
    /// Static astigmatism at the pupil edge, radians
    pub astigmatism_rad: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fringe: FringeModel {
                pupil: Some(Aperture::new(0.0, 0.0, 1.6)),
                noise_sigma: 2.0,
                ..Default::default()
            },
            wavelength_nm: 775.0,
            stroke_nm: 100.0,
            roll: DEFAULT_ROLL,
            defocus_rad: 1.2,
            astigmatism_rad: 0.4,
            seed: 0,
        }
    }
}

pub struct SimulatedInterferometer {
    config: SimConfig,
    layout: ActuatorLayout,
    grid: Grid,
    aberration: Array2<f64>,
    command: SharedCommand,
    rng: ChaCha8Rng,
    frames: u64,
}

impl SimulatedInterferometer {
    pub fn new(config: SimConfig, layout: ActuatorLayout) -> Result<Self> {
        let grid = config.fringe.camera_grid()?;
        let r = config.fringe.pupil.map_or(1.5, |p| p.radius);
        let (defocus, astig) = (config.defocus_rad, config.astigmatism_rad);
        let aberration = config.fringe.phase_from_fn(|x, y| {
            let (u, v) = (x / r, y / r);
            defocus * (u * u + v * v) + astig * (u * u - v * v)
        })?;
        Ok(Self {
            command: Arc::new(Mutex::new(vec![0.0; layout.len()])),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            frames: 0,
            config,
            layout,
            grid,
            aberration,
        })
    }

    /// A mirror handle driving this interferometer.
    pub fn dm(&self) -> SimulatedDm {
        SimulatedDm {
            size: self.layout.len(),
            command: Arc::clone(&self.command),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn layout(&self) -> &ActuatorLayout {
        &self.layout
    }

    /// Optical phase in radians for the current mirror command.
    pub fn phase(&self) -> Result<Array2<f64>> {
        let command = self
            .command
            .lock()
            .map_err(|_| DeviceError::Poisoned)?
            .clone();
        let surface = self
            .layout
            .surface(&command, &self.grid, self.config.roll)?;
        let to_rad = self.config.stroke_nm * 2.0 * PI / self.config.wavelength_nm;
        Ok(&self.aberration + &surface.mapv(|s| s * to_rad))
    }
}

impl FrameSource for SimulatedInterferometer {
    fn shape(&self) -> (usize, usize) {
        self.config.fringe.shape
    }

    fn pixel_size(&self) -> PixelSize {
        self.config.fringe.pixel
    }

    fn grab_image(&mut self) -> Result<Array2<u16>> {
        let phase = self.phase()?;
        let frame = self.config.fringe.capture(&phase.view(), &mut self.rng)?;
        self.frames += 1;
        debug!("simulated frame {}", self.frames);
        Ok(frame)
    }
}

/// Mirror half of the simulation.
#[derive(Debug, Clone)]
pub struct SimulatedDm {
    size: usize,
    command: SharedCommand,
}

impl ActuatorSink for SimulatedDm {
    fn size(&self) -> usize {
        self.size
    }

    fn write(&mut self, u: &[f64]) -> Result<()> {
        if u.len() != self.size {
            return Err(DeviceError::InvalidCommand(format!(
                "{} values for {} actuators",
                u.len(),
                self.size
            )));
        }
        let mut command = self.command.lock().map_err(|_| DeviceError::Poisoned)?;
        command.copy_from_slice(u);
        Ok(())
    }
}
