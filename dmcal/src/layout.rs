//! Actuator geometry of a square-grid deformable mirror.
//!
//! Actuators sit on an `n x n` grid with the four corners missing. They are
//! numbered row by row (row = y index, column = x index), skipping the
//! corners, so the 12x12 mirror has 140 actuators with row 0 holding indices
//! 0..10.

use interf::Grid;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{CalibrationError, Result};

/// Influence roll-off used when none is measured.
pub const DEFAULT_ROLL: f64 = 2.0;

/// Named voltage patterns used for alignment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// The central 2x2 block
    Centre,
    /// The two central rows and columns
    Cross,
    /// Both diagonals
    X,
    /// Outermost ring
    Rim,
    /// Alternating signs
    Checker,
}

/// One actuator: grid position and location in mm relative to the mirror centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Actuator {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorLayout {
    side: usize,
    pitch_mm: f64,
    actuators: Vec<Actuator>,
}

impl ActuatorLayout {
    /// `side x side` grid at `pitch_mm`, corners excluded.
    pub fn square_grid(side: usize, pitch_mm: f64) -> Self {
        let half = (side as f64 - 1.0) / 2.0;
        let last = side.saturating_sub(1);
        let mut actuators = Vec::with_capacity(side * side);
        for row in 0..side {
            for col in 0..side {
                let corner = (row == 0 || row == last) && (col == 0 || col == last);
                if corner {
                    continue;
                }
                actuators.push(Actuator {
                    row,
                    col,
                    x: (col as f64 - half) * pitch_mm,
                    y: (row as f64 - half) * pitch_mm,
                });
            }
        }
        Self {
            side,
            pitch_mm,
            actuators,
        }
    }

    /// The 140-actuator mirror: 12x12 grid at 0.3 mm pitch.
    pub fn dm140() -> Self {
        Self::square_grid(12, 0.3)
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn pitch_mm(&self) -> f64 {
        self.pitch_mm
    }

    pub fn actuators(&self) -> &[Actuator] {
        &self.actuators
    }

    /// Actuator index at a grid position, `None` for corners and outside the grid.
    pub fn index_of(&self, row: usize, col: usize) -> Option<usize> {
        self.actuators
            .iter()
            .position(|a| a.row == row && a.col == col)
    }

    /// Index of the actuator nearest `(x, y)` in mm, if within half a pitch.
    pub fn nearest(&self, x: f64, y: f64) -> Option<usize> {
        let limit = 0.5 * self.pitch_mm;
        self.actuators
            .iter()
            .enumerate()
            .filter(|(_, a)| (a.x - x).abs() <= limit && (a.y - y).abs() <= limit)
            .min_by(|(_, a), (_, b)| {
                let da = (a.x - x).hypot(a.y - y);
                let db = (b.x - x).hypot(b.y - y);
                da.total_cmp(&db)
            })
            .map(|(k, _)| k)
    }

    /// Voltage vector for a named pattern.
    pub fn preset(&self, preset: Preset, magnitude: f64) -> Vec<f64> {
        let n = self.side;
        let last = n.saturating_sub(1);
        let central = |k: usize| k >= n.saturating_sub(1) / 2 && k <= n / 2;
        self.actuators
            .iter()
            .map(|a| match preset {
                Preset::Centre if central(a.row) && central(a.col) => magnitude,
                Preset::Cross if central(a.row) || central(a.col) => magnitude,
                Preset::X if a.row == a.col || a.row + a.col == last => magnitude,
                Preset::Rim if a.row == 0 || a.col == 0 || a.row == last || a.col == last => {
                    magnitude
                }
                Preset::Checker if (a.row + a.col) % 2 == 1 => magnitude,
                Preset::Checker => -magnitude,
                _ => 0.0,
            })
            .collect()
    }

    /// Exponential influence of actuator `k` at `(x, y)` mm: `exp(-roll r / pitch)`.
    /// `None` when there is no actuator `k`.
    pub fn influence(&self, k: usize, x: f64, y: f64, roll: f64) -> Option<f64> {
        let a = self.actuators.get(k)?;
        let r = (x - a.x).hypot(y - a.y);
        Some((-roll * r / self.pitch_mm).exp())
    }

    /// Sum of actuator influences weighted by `voltages`, sampled on `grid`.
    ///
    /// The mirror centre sits on the grid origin at unit magnification.
    pub fn surface(&self, voltages: &[f64], grid: &Grid, roll: f64) -> Result<Array2<f64>> {
        if voltages.len() != self.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} voltages for {} actuators",
                voltages.len(),
                self.len()
            )));
        }
        let driven: Vec<(&Actuator, f64)> = self
            .actuators
            .iter()
            .zip(voltages.iter().copied())
            .filter(|(_, v)| *v != 0.0)
            .collect();
        let scale = roll / self.pitch_mm;
        Ok(Zip::from(&grid.xx).and(&grid.yy).map_collect(|&x, &y| {
            driven
                .iter()
                .map(|&(a, v)| v * (-scale * (x - a.x).hypot(y - a.y)).exp())
                .sum()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interf::grid::camera_grid;
    use interf::PixelSize;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    fn on(u: &[f64]) -> Vec<usize> {
        u.iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(k, _)| k)
            .collect()
    }

    #[test]
    fn test_dm140_numbering() {
        let layout = ActuatorLayout::dm140();
        assert_eq!(layout.len(), 140);
        assert_eq!(layout.index_of(0, 0), None);
        assert_eq!(layout.index_of(0, 1), Some(0));
        assert_eq!(layout.index_of(1, 0), Some(10));
        assert_eq!(layout.index_of(11, 10), Some(139));
        let a = layout.actuators()[0];
        assert!((a.x - (-4.5 * 0.3)).abs() < 1e-12);
        assert!((a.y - (-5.5 * 0.3)).abs() < 1e-12);
    }

    #[test]
    fn test_centre_preset() {
        let layout = ActuatorLayout::dm140();
        let u = layout.preset(Preset::Centre, 0.7);
        assert_eq!(on(&u), vec![63, 64, 75, 76]);
        assert!(u.iter().all(|v| *v == 0.0 || *v == 0.7));
    }

    #[test]
    fn test_cross_preset() {
        let layout = ActuatorLayout::dm140();
        let on = on(&layout.preset(Preset::Cross, 1.0));
        // Two full rows of 12 plus two columns over the other ten rows
        assert_eq!(on.len(), 24 + 2 * 10);
        assert!(on.contains(&4) && on.contains(&5));
        assert!((58..82).all(|k| on.contains(&k)));
        assert!(on.contains(&134) && on.contains(&135));
    }

    #[test]
    fn test_x_and_rim_presets() {
        let layout = ActuatorLayout::dm140();
        let x = on(&layout.preset(Preset::X, 1.0));
        assert_eq!(x.len(), 20);
        assert!(x.contains(&11) && x.contains(&20) && x.contains(&128));

        let rim = on(&layout.preset(Preset::Rim, 1.0));
        assert_eq!(rim.len(), 40);
        assert!((0..10).all(|k| rim.contains(&k)));
        assert!(rim.contains(&10) && rim.contains(&21));
    }

    #[test]
    fn test_checker_alternates() {
        let layout = ActuatorLayout::dm140();
        let u = layout.preset(Preset::Checker, 0.5);
        assert_eq!(u[0], 0.5);
        assert_eq!(u[1], -0.5);
        assert_eq!(u[10], 0.5);
        assert_eq!(u[130], -0.5);
        assert!(u.iter().all(|v| v.abs() == 0.5));
    }

    #[test]
    fn test_preset_names() {
        assert_eq!(Preset::from_str("centre").unwrap(), Preset::Centre);
        assert_eq!(Preset::Checker.to_string(), "checker");
        assert_eq!(Preset::iter().count(), 5);
    }

    #[test]
    fn test_nearest_and_influence() {
        let layout = ActuatorLayout::dm140();
        let k = layout.index_of(5, 5).unwrap();
        let a = layout.actuators()[k];
        assert_eq!(layout.nearest(a.x + 0.05, a.y - 0.05), Some(k));
        assert_eq!(layout.nearest(10.0, 10.0), None);
        assert!((layout.influence(k, a.x, a.y, 2.0).unwrap() - 1.0).abs() < 1e-15);
        let one_pitch = layout.influence(k, a.x + 0.3, a.y, 2.0).unwrap();
        assert!((one_pitch - (-2.0_f64).exp()).abs() < 1e-12);
        assert_eq!(layout.influence(layout.len(), 0.0, 0.0, 2.0), None);
    }

    #[test]
    fn test_surface_superposes_influences() {
        let layout = ActuatorLayout::dm140();
        let grid = camera_grid((32, 32), PixelSize::square(100.0)).unwrap();
        let centre = layout.preset(Preset::Centre, 0.7);
        let surface = layout.surface(&centre, &grid, DEFAULT_ROLL).unwrap();

        let (r0, c0) = grid.origin();
        let expected: f64 = [63, 64, 75, 76]
            .iter()
            .map(|&k| 0.7 * layout.influence(k, 0.0, 0.0, DEFAULT_ROLL).unwrap())
            .sum();
        assert!((surface[[r0, c0]] - expected).abs() < 1e-12);
        assert!(surface[[0, 0]] < 1e-3 * surface[[r0, c0]]);

        assert!(layout.surface(&[1.0; 3], &grid, DEFAULT_ROLL).is_err());
    }
}
