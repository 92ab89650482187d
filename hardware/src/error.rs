use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("camera error: {0}")]
    Camera(String),

    #[error("actuator error: {0}")]
    Actuator(String),

    /// Command rejected before reaching the device
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("shared device state poisoned")]
    Poisoned,

    #[error(transparent)]
    Pipeline(#[from] interf::Error),

    #[error(transparent)]
    Calibration(#[from] dmcal::CalibrationError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
