//! Poke sequences: actuator command matrices paired with their frames.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, Result};

/// Level pattern for [`cyclic_pokes`], one entry per neighbour driven.
pub const CYCLIC_LEVELS: [f64; 5] = [0.7, -0.35, 0.15, -0.1, 0.05];

/// `num` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

/// One actuator at a time through every level, framed by rest columns.
///
/// Shape `n x (n * levels.len() + 2)`: `[0 | kron(I, levels) | 0]`.
pub fn sequential_pokes(n: usize, levels: &[f64]) -> Array2<f64> {
    let m = levels.len();
    let mut u = Array2::zeros((n, n * m + 2));
    for k in 0..n {
        for (l, level) in levels.iter().enumerate() {
            u[[k, 1 + k * m + l]] = *level;
        }
    }
    u
}

/// Step `s` drives actuators `s, s+1, ...` (mod n) with `levels`, framed by
/// rest columns. Shape `n x (n + 2)`.
///
/// Every actuator takes each level once, so `U Uᵀ` is circulant. With a
/// dominant first level it is diagonally dominant and therefore invertible.
///
/// # Errors
/// `InvalidInput` when `levels` is empty, longer than `n`, or the first level
/// does not dominate the rest.
pub fn cyclic_pokes(n: usize, levels: &[f64]) -> Result<Array2<f64>> {
    let Some((lead, rest)) = levels.split_first() else {
        return Err(CalibrationError::InvalidInput("no poke levels".to_string()));
    };
    if levels.len() > n {
        return Err(CalibrationError::InvalidInput(format!(
            "{} levels for {n} actuators",
            levels.len()
        )));
    }
    let tail: f64 = rest.iter().map(|v| v.abs()).sum();
    if lead.abs() <= tail {
        return Err(CalibrationError::InvalidInput(format!(
            "leading level {lead} does not dominate the remaining {tail}"
        )));
    }

    let mut u = Array2::zeros((n, n + 2));
    for step in 0..n {
        for (offset, level) in levels.iter().enumerate() {
            u[[(step + offset) % n, step + 1]] = *level;
        }
    }
    Ok(u)
}

/// Commands and the frames recorded for them, one column of `u` per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokeSequence {
    /// `num_actuators x num_steps`
    pub u: Array2<f64>,
    /// `num_steps x rows x cols`
    pub images: Array3<u16>,
}

impl PokeSequence {
    /// # Errors
    /// `InvalidInput` when the step counts differ.
    pub fn new(u: Array2<f64>, images: Array3<u16>) -> Result<Self> {
        if u.ncols() != images.len_of(Axis(0)) {
            return Err(CalibrationError::InvalidInput(format!(
                "U has {} steps but there are {} images",
                u.ncols(),
                images.len_of(Axis(0))
            )));
        }
        Ok(Self { u, images })
    }

    pub fn num_actuators(&self) -> usize {
        self.u.nrows()
    }

    pub fn num_steps(&self) -> usize {
        self.u.ncols()
    }

    /// Frame shape `(rows, cols)`.
    pub fn image_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.images.dim();
        (rows, cols)
    }

    pub fn image(&self, step: usize) -> ArrayView2<'_, u16> {
        self.images.slice(s![step, .., ..])
    }

    /// Steps where every actuator is at zero.
    pub fn rest_steps(&self) -> Vec<usize> {
        self.u
            .axis_iter(Axis(1))
            .enumerate()
            .filter(|(_, col)| col.iter().all(|v| *v == 0.0))
            .map(|(step, _)| step)
            .collect()
    }

    /// Number of steps where each actuator is non-zero.
    pub fn pokes_per_actuator(&self) -> Vec<usize> {
        self.u
            .axis_iter(Axis(0))
            .map(|row| row.iter().filter(|v| **v != 0.0).count())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(-1.0, 1.0, 5), vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_sequential_layout() {
        let u = sequential_pokes(3, &[0.5, -0.5]);
        assert_eq!(u.dim(), (3, 8));
        assert!(u.column(0).iter().all(|v| *v == 0.0));
        assert!(u.column(7).iter().all(|v| *v == 0.0));
        assert_eq!(u[[0, 1]], 0.5);
        assert_eq!(u[[0, 2]], -0.5);
        assert_eq!(u[[1, 3]], 0.5);
        assert_eq!(u[[2, 6]], -0.5);
        assert_eq!(u.iter().filter(|v| **v != 0.0).count(), 6);
    }

    #[test]
    fn test_cyclic_shape_and_rank() {
        let n = 140;
        let u = cyclic_pokes(n, &CYCLIC_LEVELS).unwrap();
        assert_eq!(u.dim(), (140, 142));
        assert!(u.column(0).iter().all(|v| *v == 0.0));
        assert!(u.column(141).iter().all(|v| *v == 0.0));
        // Wraps around the last actuator
        assert_eq!(u[[139, 140]], 0.7);
        assert_eq!(u[[0, 140]], -0.35);

        let m = DMatrix::from_fn(n, n + 2, |r, c| u[[r, c]]);
        let gram = &m * m.transpose();
        let energy: f64 = CYCLIC_LEVELS.iter().map(|v| v * v).sum();
        assert_relative_eq!(gram[(7, 7)], energy, epsilon = 1e-12);
        assert!(gram.cholesky().is_some());
    }

    #[test]
    fn test_cyclic_rejects_bad_levels() {
        assert!(cyclic_pokes(4, &[]).is_err());
        assert!(cyclic_pokes(2, &CYCLIC_LEVELS).is_err());
        assert!(cyclic_pokes(8, &[0.3, 0.3]).is_err());
    }

    #[test]
    fn test_sequence_bookkeeping() {
        let u = cyclic_pokes(6, &[0.7, -0.2]).unwrap();
        let images = Array3::zeros((8, 4, 5));
        let seq = PokeSequence::new(u.clone(), images).unwrap();
        assert_eq!(seq.num_actuators(), 6);
        assert_eq!(seq.num_steps(), 8);
        assert_eq!(seq.image_shape(), (4, 5));
        assert_eq!(seq.rest_steps(), vec![0, 7]);
        assert_eq!(seq.pokes_per_actuator(), vec![2; 6]);

        let short = Array3::zeros((7, 4, 5));
        assert!(matches!(
            PokeSequence::new(u, short),
            Err(CalibrationError::InvalidInput(_))
        ));
    }
}
