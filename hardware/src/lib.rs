//! Devices of the interferometric test bench.
//!
//! The rest of the workspace talks to a camera through [`FrameSource`] and to
//! a deformable mirror through [`ActuatorSink`]. Two backends exist:
//!
//! - [`sim`] - a simulated interferometer and mirror sharing actuator state
//! - [`replay`] - frames played back from a recorded [`dmcal::PokeDataset`]
//!
//! [`backend::Bench`] picks one at startup. [`live::LiveAnalysis`] runs the
//! fringe pipeline on whatever the camera delivers and
//! [`acquire::acquire_poke_dataset`] records new calibration data.

pub mod acquire;
pub mod backend;
pub mod camera;
pub mod dm;
pub mod error;
pub mod live;
pub mod replay;
pub mod sim;

pub use backend::{BackendKind, Bench, CameraBackend};
pub use camera::FrameSource;
pub use dm::{ActuatorSink, LoggingDm, VoltageTransform};
pub use error::{DeviceError, Result};
pub use live::{LiveAnalysis, LiveEvent, LiveSummary, RunMode};
