//! Plain-text export of a calibration model.
//!
//! Vectors are written one value per line, matrices one row per line with
//! single-space separators. Values use the shortest representation that
//! parses back to the same `f64`.
//!
//! Files are staged as temporaries in the target directory and only renamed
//! into place once every one of them is written.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, warn};
use ndarray::{Array1, Array2};
use tempfile::NamedTempFile;

use crate::error::{CalibrationError, Result};
use crate::model::CalibrationModel;
use crate::storage::parent_dir;

/// Mirror name from a dataset path: the file stem up to the first `_`, or
/// the first `-` when there is no underscore.
pub fn dm_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.find('_').or_else(|| stem.find('-')) {
        Some(i) => stem[..i].to_string(),
        None => stem,
    }
}

/// Paths of the three exported files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub z0: PathBuf,
    pub c: PathBuf,
    pub uflat: PathBuf,
}

impl ExportPaths {
    /// `<DM>_<r_mm>mm_CAL_{Z0_vector,C_matrix,U0_vector}.dat` in `dir`, with
    /// the pupil radius in mm to three decimals.
    pub fn new(dir: &Path, dm_name: &str, pupil_radius_um: f64) -> Self {
        let prefix = format!("{dm_name}_{:.3}mm_CAL", pupil_radius_um * 1e-3);
        Self {
            z0: dir.join(format!("{prefix}_Z0_vector.dat")),
            c: dir.join(format!("{prefix}_C_matrix.dat")),
            uflat: dir.join(format!("{prefix}_U0_vector.dat")),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [self.z0.as_path(), self.c.as_path(), self.uflat.as_path()]
    }

    /// Remove whichever of the three files exist.
    pub fn discard(&self) {
        for path in self.all() {
            remove_if_present(path);
        }
    }
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {}: {e}", path.display()),
    }
}

/// Write `z0`, `C` and `uflat` next to each other in `dir`.
///
/// Either all three files are committed or none is: a failure leaves no
/// exported file behind.
pub fn export_model(
    model: &CalibrationModel,
    dir: &Path,
    dm_name: &str,
    pupil_radius_um: f64,
) -> Result<ExportPaths> {
    let paths = ExportPaths::new(dir, dm_name, pupil_radius_um);
    let staged = vec![
        (stage(dir, &vector_text(&model.z0))?, paths.z0.as_path()),
        (stage(dir, &matrix_text(&model.c))?, paths.c.as_path()),
        (stage(dir, &vector_text(&model.uflat))?, paths.uflat.as_path()),
    ];
    commit(staged)?;
    Ok(paths)
}

pub fn import_model(paths: &ExportPaths) -> Result<CalibrationModel> {
    Ok(CalibrationModel {
        z0: read_vector(&paths.z0)?,
        c: read_matrix(&paths.c)?,
        uflat: read_vector(&paths.uflat)?,
    })
}

fn vector_text(v: &Array1<f64>) -> String {
    v.iter().map(|x| format!("{x:?}\n")).collect()
}

fn matrix_text(m: &Array2<f64>) -> String {
    m.rows()
        .into_iter()
        .map(|row| format!("{}\n", row.iter().map(|x| format!("{x:?}")).join(" ")))
        .collect()
}

/// Write `text` to a synced temporary file in `dir`.
fn stage(dir: &Path, text: &str) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CalibrationError::io(dir, e))?;
    tmp.write_all(text.as_bytes())
        .map_err(|e| CalibrationError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CalibrationError::io(tmp.path(), e))?;
    Ok(tmp)
}

/// Rename staged files onto their targets, undoing earlier renames when one
/// fails. Uncommitted temporaries are deleted on drop.
fn commit(staged: Vec<(NamedTempFile, &Path)>) -> Result<()> {
    let mut committed: Vec<&Path> = Vec::with_capacity(staged.len());
    for (tmp, target) in staged {
        if let Err(e) = tmp.persist(target) {
            for path in committed {
                remove_if_present(path);
            }
            return Err(CalibrationError::io(target, e.error));
        }
        committed.push(target);
    }
    Ok(())
}

pub fn write_vector(path: &Path, v: &Array1<f64>) -> Result<()> {
    commit(vec![(stage(parent_dir(path), &vector_text(v))?, path)])
}

pub fn write_matrix(path: &Path, m: &Array2<f64>) -> Result<()> {
    commit(vec![(stage(parent_dir(path), &matrix_text(m))?, path)])
}

fn parse_rows(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            line.split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|e| {
                        CalibrationError::InvalidInput(format!(
                            "{}:{}: {tok:?}: {e}",
                            path.display(),
                            n + 1
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

pub fn read_vector(path: &Path) -> Result<Array1<f64>> {
    let rows = parse_rows(path)?;
    if let Some(row) = rows.iter().find(|r| r.len() != 1) {
        return Err(CalibrationError::InvalidInput(format!(
            "{}: expected one value per line, found {}",
            path.display(),
            row.len()
        )));
    }
    Ok(rows.into_iter().flatten().collect())
}

pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let rows = parse_rows(path)?;
    let cols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != cols) {
        return Err(CalibrationError::InvalidInput(format!(
            "{}: ragged matrix rows",
            path.display()
        )));
    }
    let n = rows.len();
    Array2::from_shape_vec((n, cols), rows.into_iter().flatten().collect()).map_err(|e| {
        CalibrationError::InvalidInput(format!("{}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dm_name() {
        assert_eq!(dm_name_from_path(Path::new("/data/DM140A_pokes.h5")), "DM140A");
        assert_eq!(dm_name_from_path(Path::new("17BW023#017-2024_x.json")), "17BW023#017-2024");
        assert_eq!(dm_name_from_path(Path::new("beta-3.json")), "beta");
        assert_eq!(dm_name_from_path(Path::new("plain.bin")), "plain");
    }

    #[test]
    fn test_export_names() {
        let paths = ExportPaths::new(Path::new("out"), "DM140A", 1500.0);
        assert_eq!(paths.z0, Path::new("out/DM140A_1.500mm_CAL_Z0_vector.dat"));
        assert_eq!(paths.c, Path::new("out/DM140A_1.500mm_CAL_C_matrix.dat"));
        assert_eq!(paths.uflat, Path::new("out/DM140A_1.500mm_CAL_U0_vector.dat"));
    }

    #[test]
    fn test_export_reloads_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let model = CalibrationModel {
            z0: array![0.1 + 0.2, -3.5e-12, 42.0],
            c: array![[1.0 / 3.0, -2.0], [1e300, 5e-324], [0.0, -0.0]],
            uflat: array![std::f64::consts::PI, -1.0, 7.25],
        };
        let paths = export_model(&model, dir.path(), "DM", 1250.0).unwrap();
        assert!(paths.c.ends_with("DM_1.250mm_CAL_C_matrix.dat"));

        let text = std::fs::read_to_string(&paths.c).unwrap();
        assert_eq!(text.lines().next(), Some("0.3333333333333333 -2.0"));
        assert_eq!(import_model(&paths).unwrap(), model);
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.dat");
        std::fs::write(&path, "1 2\n3\n").unwrap();
        assert!(matches!(
            read_matrix(&path),
            Err(CalibrationError::InvalidInput(_))
        ));
        std::fs::write(&path, "1 x\n").unwrap();
        assert!(read_matrix(&path).is_err());
    }
}
