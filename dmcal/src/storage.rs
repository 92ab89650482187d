//! Atomic serde persistence, format chosen by file extension.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{CalibrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    Json,
    Bincode,
}

impl Format {
    /// `.bin` and `.bincode` are bincode, anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bin" | "bincode") => Format::Bincode,
            _ => Format::Json,
        }
    }
}

/// Directory a file at `path` lives in, `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Write `value` to a temporary file next to `path`, then rename it into place.
///
/// Nothing appears at `path` unless the whole value was written and synced.
pub fn save<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let dir = parent_dir(path);
    let tmp = NamedTempFile::new_in(dir).map_err(|e| CalibrationError::io(dir, e))?;
    let format = Format::from_path(path);
    {
        let mut writer = BufWriter::new(tmp.as_file());
        match format {
            Format::Json => serde_json::to_writer(&mut writer, value)?,
            Format::Bincode => bincode::serialize_into(&mut writer, value)?,
        }
        writer
            .flush()
            .map_err(|e| CalibrationError::io(tmp.path(), e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| CalibrationError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| CalibrationError::io(path, e.error))?;
    debug!("wrote {} ({format})", path.display());
    Ok(())
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| CalibrationError::io(path, e))?;
    let reader = BufReader::new(file);
    Ok(match Format::from_path(path) {
        Format::Json => serde_json::from_reader(reader)?,
        Format::Bincode => bincode::deserialize_from(reader)?,
    })
}
