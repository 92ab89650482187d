//! Reliability-sorted, region-merging 2-D phase unwrapping.
//!
//! Pixels are ranked by the wrapped second differences to their eight
//! neighbours. Edges between neighbouring pixels are then visited from the
//! most to the least reliable pair. Each edge joins two groups, shifting the
//! smaller one by whole turns so the pair is continuous. The result depends
//! only on the input values, so the same map always unwraps the same way.
//!
//! Non-finite pixels never join a group and come back as NaN.

use std::f64::consts::PI;

use log::debug;
use ndarray::{Array2, ArrayView2};

use crate::error::{Error, Result};

const TAU: f64 = 2.0 * PI;
const NONE: usize = usize::MAX;

/// Wrap an angle into `(-π, π]`.
pub fn wrap(x: f64) -> f64 {
    PI - (PI - x).rem_euclid(TAU)
}

/// Unwrapped phase plus the residue count of the wrapped input.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwrappedPhase {
    pub phase: Array2<f64>,
    /// Number of 2x2 loops with non-zero wrapped circulation. Zero for a
    /// clean map; grows with noise and true discontinuities.
    pub residues: usize,
}

/// Count phase residues, optionally only loops whose four corners are in `mask`.
pub fn count_residues(wrapped: &ArrayView2<f64>, mask: Option<&ArrayView2<bool>>) -> usize {
    let (rows, cols) = wrapped.dim();
    if rows < 2 || cols < 2 {
        return 0;
    }
    let mut count = 0;
    for i in 0..rows - 1 {
        for j in 0..cols - 1 {
            let corners = [(i, j), (i, j + 1), (i + 1, j + 1), (i + 1, j)];
            if let Some(m) = mask {
                if !corners.iter().all(|&ij| m[ij]) {
                    continue;
                }
            }
            let v = corners.map(|ij| wrapped[ij]);
            if !v.iter().all(|p| p.is_finite()) {
                continue;
            }
            let circulation = wrap(v[1] - v[0]) + wrap(v[2] - v[1]) + wrap(v[3] - v[2]) + wrap(v[0] - v[3]);
            if circulation.abs() > PI {
                count += 1;
            }
        }
    }
    count
}

/// Second-difference reliability measure; `inf` on borders and next to
/// non-finite pixels.
fn second_differences(phase: &ArrayView2<f64>) -> Array2<f64> {
    let (rows, cols) = phase.dim();
    let mut d = Array2::from_elem((rows, cols), f64::INFINITY);
    if rows < 3 || cols < 3 {
        return d;
    }
    for i in 1..rows - 1 {
        for j in 1..cols - 1 {
            let c = phase[[i, j]];
            let pair = |a: (usize, usize), b: (usize, usize)| {
                wrap(phase[a] - c) - wrap(c - phase[b])
            };
            let h = pair((i, j - 1), (i, j + 1));
            let v = pair((i - 1, j), (i + 1, j));
            let d1 = pair((i - 1, j - 1), (i + 1, j + 1));
            let d2 = pair((i - 1, j + 1), (i + 1, j - 1));
            let dij = (h * h + v * v + d1 * d1 + d2 * d2).sqrt();
            if dij.is_finite() {
                d[[i, j]] = dij;
            }
        }
    }
    d
}

/// Pixel groups as intrusive linked lists.
struct Groups {
    group: Vec<usize>,
    next: Vec<usize>,
    tail: Vec<usize>,
    size: Vec<usize>,
}

impl Groups {
    fn new(n: usize) -> Self {
        Self {
            group: (0..n).collect(),
            next: vec![NONE; n],
            tail: (0..n).collect(),
            size: vec![1; n],
        }
    }

    /// Shift every member of `from` by `offset` and append it to `into`.
    fn merge(&mut self, into: usize, from: usize, offset: f64, phase: &mut [f64]) {
        let mut p = from;
        while p != NONE {
            phase[p] += offset;
            self.group[p] = into;
            p = self.next[p];
        }
        let tail = self.tail[into];
        self.next[tail] = from;
        self.tail[into] = self.tail[from];
        self.size[into] += self.size[from];
    }
}

/// Unwrap a wrapped phase map.
///
/// # Errors
/// `UnwrapFailure` when the map is empty or has no finite pixel.
pub fn unwrap_phase(wrapped: &ArrayView2<f64>) -> Result<UnwrappedPhase> {
    let (rows, cols) = wrapped.dim();
    if rows == 0 || cols == 0 {
        return Err(Error::UnwrapFailure(format!(
            "empty phase map {rows}x{cols}"
        )));
    }
    let finite = wrapped.iter().filter(|v| v.is_finite()).count();
    if finite == 0 {
        return Err(Error::UnwrapFailure(format!(
            "no finite pixel in {rows}x{cols} phase map"
        )));
    }

    let reliability = second_differences(wrapped);
    let flat: Vec<f64> = wrapped.iter().copied().collect();
    let d: Vec<f64> = reliability.iter().copied().collect();
    let idx = |i: usize, j: usize| i * cols + j;

    let mut edges: Vec<(f64, usize, usize)> = Vec::with_capacity(2 * rows * cols);
    for i in 0..rows {
        for j in 0..cols {
            let a = idx(i, j);
            if !flat[a].is_finite() {
                continue;
            }
            if j + 1 < cols && flat[a + 1].is_finite() {
                edges.push((d[a] + d[a + 1], a, a + 1));
            }
            if i + 1 < rows && flat[a + cols].is_finite() {
                edges.push((d[a] + d[a + cols], a, a + cols));
            }
        }
    }
    edges.sort_by(|x, y| x.0.total_cmp(&y.0));

    let mut phase = flat.clone();
    let mut groups = Groups::new(rows * cols);
    for &(_, a, b) in &edges {
        let (ga, gb) = (groups.group[a], groups.group[b]);
        if ga == gb {
            continue;
        }
        let target = phase[a] + wrap(flat[b] - flat[a]);
        let turns = ((target - phase[b]) / TAU).round();
        if groups.size[ga] >= groups.size[gb] {
            groups.merge(ga, gb, turns * TAU, &mut phase);
        } else {
            groups.merge(gb, ga, -turns * TAU, &mut phase);
        }
    }

    let phase = Array2::from_shape_vec((rows, cols), phase).map_err(|e| {
        Error::UnwrapFailure(format!("phase buffer does not fit {rows}x{cols}: {e}"))
    })?;
    let residues = count_residues(wrapped, None);
    debug!(
        "unwrapped {finite} of {} pixels over {} edges, {residues} residues",
        rows * cols,
        edges.len()
    );

    Ok(UnwrappedPhase { phase, residues })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn smooth_surface(shape: (usize, usize)) -> Array2<f64> {
        let (rows, cols) = shape;
        Array2::from_shape_fn(shape, |(i, j)| {
            let x = j as f64 / cols as f64 - 0.5;
            let y = i as f64 / rows as f64 - 0.5;
            25.0 * x + 12.0 * y + 30.0 * (x * x + y * y)
        })
    }

    fn assert_equal_up_to_constant(a: &Array2<f64>, b: &Array2<f64>, tol: f64) {
        let offset = a[[0, 0]] - b[[0, 0]];
        for (x, y) in a.iter().zip(b.iter()) {
            if x.is_finite() {
                assert_relative_eq!(x - y, offset, epsilon = tol);
            }
        }
    }

    #[test]
    fn test_wrap_range() {
        assert_relative_eq!(wrap(PI), PI);
        assert_relative_eq!(wrap(-PI), PI);
        assert_relative_eq!(wrap(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap(0.25), 0.25, epsilon = 1e-15);
        assert_relative_eq!(wrap(-7.0 * TAU + 0.5), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_recovers_smooth_surface() {
        let truth = smooth_surface((48, 40));
        let wrapped = truth.mapv(wrap);
        let out = unwrap_phase(&wrapped.view()).unwrap();
        assert_eq!(out.residues, 0);
        assert_equal_up_to_constant(&out.phase, &truth, 1e-9);
    }

    #[test]
    fn test_nan_pixels_stay_nan() {
        let truth = smooth_surface((32, 32));
        let mut wrapped = truth.mapv(wrap);
        for j in 0..32 {
            wrapped[[0, j]] = f64::NAN;
        }
        wrapped[[16, 16]] = f64::NAN;
        let out = unwrap_phase(&wrapped.view()).unwrap();
        assert!(out.phase[[16, 16]].is_nan());
        assert!(out.phase[[0, 5]].is_nan());
        let offset = out.phase[[1, 0]] - truth[[1, 0]];
        for ((i, j), v) in out.phase.indexed_iter() {
            if v.is_finite() {
                assert_relative_eq!(v - truth[[i, j]], offset, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_isolated_noise_is_tolerated() {
        let truth = smooth_surface((40, 40));
        let mut wrapped = truth.mapv(wrap);
        wrapped[[20, 20]] = wrap(wrapped[[20, 20]] + 3.0);
        let out = unwrap_phase(&wrapped.view()).unwrap();
        assert!(out.residues > 0);
        // Far from the bad pixel the surface is intact
        let offset = out.phase[[0, 0]] - truth[[0, 0]];
        assert_relative_eq!(out.phase[[39, 39]] - truth[[39, 39]], offset, epsilon = 1e-9);
        assert_relative_eq!(out.phase[[5, 35]] - truth[[5, 35]], offset, epsilon = 1e-9);
    }

    #[test]
    fn test_deterministic() {
        let wrapped = smooth_surface((24, 24)).mapv(wrap);
        let a = unwrap_phase(&wrapped.view()).unwrap();
        let b = unwrap_phase(&wrapped.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_nan_fails() {
        let wrapped = Array2::from_elem((8, 8), f64::NAN);
        assert!(matches!(
            unwrap_phase(&wrapped.view()),
            Err(Error::UnwrapFailure(_))
        ));
        let empty = Array2::<f64>::zeros((0, 4));
        assert!(matches!(
            unwrap_phase(&empty.view()),
            Err(Error::UnwrapFailure(_))
        ));
    }

    #[test]
    fn test_residue_detects_vortex() {
        let (rows, cols) = (16, 16);
        let vortex = Array2::from_shape_fn((rows, cols), |(i, j)| {
            (i as f64 - 7.5).atan2(j as f64 - 7.5)
        });
        assert_eq!(count_residues(&vortex.view(), None), 1);
        let mask = Array2::from_shape_fn((rows, cols), |(i, _)| i < 4);
        assert_eq!(count_residues(&vortex.view(), Some(&mask.view())), 0);
    }
}
