//! Deformable-mirror command interface.

use log::{debug, warn};

use crate::error::{DeviceError, Result};

/// Anything that accepts one voltage per actuator.
pub trait ActuatorSink: Send {
    /// Number of actuators
    fn size(&self) -> usize;

    /// Apply a full command, one entry per actuator.
    fn write(&mut self, u: &[f64]) -> Result<()>;
}

impl<T: ActuatorSink + ?Sized> ActuatorSink for Box<T> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn write(&mut self, u: &[f64]) -> Result<()> {
        (**self).write(u)
    }
}

fn check_command(u: &[f64], size: usize) -> Result<()> {
    if u.len() != size {
        return Err(DeviceError::InvalidCommand(format!(
            "{} values for {size} actuators",
            u.len()
        )));
    }
    if let Some(k) = u.iter().position(|v| !v.is_finite()) {
        return Err(DeviceError::InvalidCommand(format!(
            "non-finite value {} for actuator {k}",
            u[k]
        )));
    }
    Ok(())
}

/// Maps normalized commands in `[-1, 1]` to drive levels.
///
/// Actuator stroke grows with the square of the drive, so commands are
/// passed through `v = 2 sqrt((u + 1) / 2) - 1` to make the response linear
/// in `u`. Out-of-range commands are clamped and logged.
pub struct VoltageTransform<S> {
    inner: S,
}

impl<S: ActuatorSink> VoltageTransform<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn transform(u: f64) -> f64 {
        2.0 * ((u + 1.0) / 2.0).sqrt() - 1.0
    }
}

impl<S: ActuatorSink> ActuatorSink for VoltageTransform<S> {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn write(&mut self, u: &[f64]) -> Result<()> {
        check_command(u, self.size())?;
        let peak = u.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if peak > 1.0 {
            warn!("saturation: command peak {peak:.3} clamped to [-1, 1]");
        }
        let v: Vec<f64> = u
            .iter()
            .map(|x| Self::transform(x.clamp(-1.0, 1.0)))
            .collect();
        self.inner.write(&v)
    }
}

/// Sink that only records and logs what it is sent.
#[derive(Debug, Clone)]
pub struct LoggingDm {
    size: usize,
    last: Vec<f64>,
    writes: usize,
}

impl LoggingDm {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            last: vec![0.0; size],
            writes: 0,
        }
    }

    pub fn last(&self) -> &[f64] {
        &self.last
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ActuatorSink for LoggingDm {
    fn size(&self) -> usize {
        self.size
    }

    fn write(&mut self, u: &[f64]) -> Result<()> {
        check_command(u, self.size)?;
        self.last.copy_from_slice(u);
        self.writes += 1;
        let peak = u.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        debug!("dm write #{}: peak |u| {peak:.3}", self.writes);
        Ok(())
    }
}
