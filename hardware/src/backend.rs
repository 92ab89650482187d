//! Backend selection, made once at startup.

use std::path::Path;

use dmcal::ActuatorLayout;
use interf::PixelSize;
use log::{info, warn};
use ndarray::Array2;
use strum::{Display, EnumString};

use crate::camera::FrameSource;
use crate::dm::{ActuatorSink, LoggingDm, VoltageTransform};
use crate::error::{DeviceError, Result};
use crate::replay::DatasetReplay;
use crate::sim::{SimConfig, SimulatedInterferometer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    Sim,
    Replay,
}

pub enum CameraBackend {
    Simulated(SimulatedInterferometer),
    Replay(DatasetReplay),
}

impl FrameSource for CameraBackend {
    fn shape(&self) -> (usize, usize) {
        match self {
            CameraBackend::Simulated(cam) => cam.shape(),
            CameraBackend::Replay(cam) => cam.shape(),
        }
    }

    fn pixel_size(&self) -> PixelSize {
        match self {
            CameraBackend::Simulated(cam) => cam.pixel_size(),
            CameraBackend::Replay(cam) => cam.pixel_size(),
        }
    }

    fn grab_image(&mut self) -> Result<Array2<u16>> {
        match self {
            CameraBackend::Simulated(cam) => cam.grab_image(),
            CameraBackend::Replay(cam) => cam.grab_image(),
        }
    }
}

/// Camera and mirror that belong together.
pub struct Bench {
    pub camera: CameraBackend,
    pub dm: Box<dyn ActuatorSink>,
    pub layout: ActuatorLayout,
}

impl Bench {
    /// Simulated interferometer with the 140-actuator mirror in front of it.
    pub fn simulated(config: SimConfig) -> Result<Self> {
        let layout = ActuatorLayout::dm140();
        let camera = SimulatedInterferometer::new(config, layout.clone())?;
        let dm = Box::new(camera.dm());
        info!(
            "simulated bench: {:?} frames, {} actuators",
            camera.shape(),
            layout.len()
        );
        Ok(Self {
            camera: CameraBackend::Simulated(camera),
            dm,
            layout,
        })
    }

    /// Recorded frames with a mirror that only logs commands.
    pub fn replay(path: &Path, looping: bool) -> Result<Self> {
        let camera = DatasetReplay::open(path, looping)?;
        let size = camera.dataset().u.nrows();
        let layout = ActuatorLayout::dm140();
        if layout.len() != size {
            warn!(
                "dataset drives {size} actuators, layout has {}; presets may not apply",
                layout.len()
            );
        }
        Ok(Self {
            camera: CameraBackend::Replay(camera),
            dm: Box::new(VoltageTransform::new(LoggingDm::new(size))),
            layout,
        })
    }

    pub fn open(kind: BackendKind, dataset: Option<&Path>, sim: SimConfig) -> Result<Self> {
        match (kind, dataset) {
            (BackendKind::Sim, _) => Self::simulated(sim),
            (BackendKind::Replay, Some(path)) => Self::replay(path, true),
            (BackendKind::Replay, None) => Err(DeviceError::Camera(
                "replay backend needs a dataset path".to_string(),
            )),
        }
    }
}
